//! Rule engine error types.

use crate::modules::actions::ActionError;
use thiserror::Error;

/// Errors raised while building or mutating rule sets.
#[derive(Debug, Error)]
pub enum RuleError {
    /// Priority outside 1..=50000.
    #[error("rule priority must be 1..=50000, got {0}")]
    InvalidPriority(u32),

    /// Two rules share a priority.
    #[error("duplicate rule priority {0}")]
    DuplicatePriority(u32),

    /// No rule with this priority.
    #[error("no rule with priority {0}")]
    RuleNotFound(u32),

    /// Non-default rule without conditions.
    #[error("rule {0} has no conditions")]
    NoConditions(u32),

    /// Default rule with conditions.
    #[error("the default rule cannot have conditions")]
    DefaultWithConditions,

    /// Default rule placed among the prioritized rules.
    #[error("the default rule cannot be given a priority slot")]
    MisplacedDefault,

    /// Too many condition values in one rule.
    #[error("rule {priority} has {count} condition values, at most 5 are allowed")]
    TooManyConditionValues {
        /// Rule priority.
        priority: u32,
        /// Number of values.
        count: usize,
    },

    /// Condition type repeated where only one is allowed.
    #[error("rule {priority} repeats the {field} condition")]
    DuplicateCondition {
        /// Rule priority.
        priority: u32,
        /// Condition field.
        field: &'static str,
    },

    /// Malformed condition.
    #[error("invalid {field} condition: {reason}")]
    InvalidCondition {
        /// Condition field.
        field: &'static str,
        /// What is wrong.
        reason: String,
    },

    /// Invalid action chain.
    #[error(transparent)]
    Action(#[from] ActionError),
}

/// Result type for rule operations.
pub type RuleResult<T> = Result<T, RuleError>;
