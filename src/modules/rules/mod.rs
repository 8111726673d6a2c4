//! Listener rule matching.
//!
//! Rules are evaluated in ascending priority order. A rule matches when all
//! of its conditions match; values within one condition are alternatives.
//! When nothing matches, the listener's default rule applies.

mod condition;
mod config;
mod engine;
mod error;
mod pattern;
mod request;
mod rule;

pub use condition::{CidrBlock, Condition, QueryMatch};
pub use config::{ConditionConfig, QueryStringValue, RuleConfig};
pub use engine::RuleEngine;
pub use error::{RuleError, RuleResult};
pub use pattern::{WildcardPattern, MAX_PATTERN_LEN, MAX_WILDCARDS};
pub use request::RequestAttributes;
pub use rule::{Rule, RuleSet, MAX_CONDITION_VALUES, MAX_PRIORITY, MIN_PRIORITY};
