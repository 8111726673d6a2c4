//! Rules and rule sets.

use super::condition::Condition;
use super::config::RuleConfig;
use super::error::{RuleError, RuleResult};
use super::request::RequestAttributes;
use crate::modules::actions::{ActionBuilder, ActionChain};
use std::sync::Arc;

/// Lowest rule priority.
pub const MIN_PRIORITY: u32 = 1;

/// Highest rule priority.
pub const MAX_PRIORITY: u32 = 50_000;

/// Most condition values a rule may carry in total.
pub const MAX_CONDITION_VALUES: usize = 5;

/// A priority-ranked condition/action pair.
#[derive(Debug, Clone)]
pub struct Rule {
    priority: Option<u32>,
    conditions: Vec<Condition>,
    actions: Arc<ActionChain>,
}

impl Rule {
    /// Create a rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the priority is out of range, there are no
    /// conditions, too many condition values, or a condition that may only
    /// appear once is repeated.
    pub fn new(
        priority: u32,
        conditions: Vec<Condition>,
        actions: Arc<ActionChain>,
    ) -> RuleResult<Self> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(RuleError::InvalidPriority(priority));
        }
        if conditions.is_empty() {
            return Err(RuleError::NoConditions(priority));
        }

        let count: usize = conditions.iter().map(Condition::value_count).sum();
        if count > MAX_CONDITION_VALUES {
            return Err(RuleError::TooManyConditionValues { priority, count });
        }

        for (i, condition) in conditions.iter().enumerate() {
            if !condition.repeatable()
                && conditions[..i].iter().any(|c| c.field() == condition.field())
            {
                return Err(RuleError::DuplicateCondition {
                    priority,
                    field: condition.field(),
                });
            }
        }

        Ok(Self {
            priority: Some(priority),
            conditions,
            actions,
        })
    }

    /// Create the listener's default rule.
    #[must_use]
    pub fn default_rule(actions: Arc<ActionChain>) -> Self {
        Self {
            priority: None,
            conditions: Vec::new(),
            actions,
        }
    }

    /// Build a rule from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a condition, the action chain, or the rule itself
    /// is invalid.
    pub fn from_config(config: &RuleConfig, actions: &ActionBuilder<'_>) -> RuleResult<Self> {
        let conditions = config
            .conditions
            .iter()
            .map(Condition::from_config)
            .collect::<RuleResult<Vec<_>>>()?;
        let chain = actions.build(&config.actions)?;
        Self::new(config.priority, conditions, Arc::new(chain))
    }

    /// Get the priority. `None` for the default rule.
    #[must_use]
    pub fn priority(&self) -> Option<u32> {
        self.priority
    }

    /// Check if this is the default rule.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.priority.is_none()
    }

    /// Get the conditions.
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Get the action chain.
    #[must_use]
    pub fn actions(&self) -> &Arc<ActionChain> {
        &self.actions
    }

    /// Check whether every condition matches.
    #[must_use]
    pub fn matches(&self, request: &RequestAttributes) -> bool {
        self.conditions.iter().all(|c| c.matches(request))
    }
}

/// An immutable, priority-ordered rule list plus the default rule.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Arc<Rule>>,
    default: Arc<Rule>,
}

impl RuleSet {
    /// Create a rule set.
    ///
    /// # Errors
    ///
    /// Returns `DefaultWithConditions` if `default` has conditions or a
    /// priority, `MisplacedDefault` if a default rule is among `rules`, and
    /// `DuplicatePriority` if two rules share a priority.
    pub fn new(rules: Vec<Rule>, default: Rule) -> RuleResult<Self> {
        if !default.is_default() || !default.conditions.is_empty() {
            return Err(RuleError::DefaultWithConditions);
        }

        if rules.iter().any(Rule::is_default) {
            return Err(RuleError::MisplacedDefault);
        }

        let mut rules: Vec<Arc<Rule>> = rules.into_iter().map(Arc::new).collect();
        rules.sort_by_key(|r| r.priority);
        for pair in rules.windows(2) {
            if pair[0].priority == pair[1].priority {
                return Err(RuleError::DuplicatePriority(pair[0].priority.unwrap_or(0)));
            }
        }

        Ok(Self {
            rules,
            default: Arc::new(default),
        })
    }

    /// A set with only a default rule.
    #[must_use]
    pub fn default_only(actions: Arc<ActionChain>) -> Self {
        Self {
            rules: Vec::new(),
            default: Arc::new(Rule::default_rule(actions)),
        }
    }

    /// Get the prioritized rules in ascending priority order.
    #[must_use]
    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    /// Get the default rule.
    #[must_use]
    pub fn default_rule(&self) -> &Arc<Rule> {
        &self.default
    }

    /// Find the lowest-priority rule whose conditions all match, falling
    /// back to the default rule.
    #[must_use]
    pub fn find(&self, request: &RequestAttributes) -> &Arc<Rule> {
        self.rules
            .iter()
            .find(|rule| rule.matches(request))
            .unwrap_or(&self.default)
    }

    /// Copy of this set with `rule` added.
    ///
    /// # Errors
    ///
    /// Returns `DuplicatePriority` if the priority is taken and
    /// `MisplacedDefault` for a default rule.
    pub fn with_rule(&self, rule: Rule) -> RuleResult<Self> {
        let Some(priority) = rule.priority else {
            return Err(RuleError::MisplacedDefault);
        };
        let at = match self.rules.binary_search_by_key(&rule.priority, |r| r.priority) {
            Ok(_) => return Err(RuleError::DuplicatePriority(priority)),
            Err(at) => at,
        };

        let mut rules = self.rules.clone();
        rules.insert(at, Arc::new(rule));
        Ok(Self {
            rules,
            default: Arc::clone(&self.default),
        })
    }

    /// Copy of this set without the rule at `priority`.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound` if no rule has that priority.
    pub fn without_rule(&self, priority: u32) -> RuleResult<(Self, Arc<Rule>)> {
        let at = self
            .rules
            .binary_search_by_key(&Some(priority), |r| r.priority)
            .map_err(|_| RuleError::RuleNotFound(priority))?;

        let mut rules = self.rules.clone();
        let removed = rules.remove(at);
        Ok((
            Self {
                rules,
                default: Arc::clone(&self.default),
            },
            removed,
        ))
    }

    /// Copy of this set with a different default action chain.
    #[must_use]
    pub fn with_default(&self, actions: Arc<ActionChain>) -> Self {
        Self {
            rules: self.rules.clone(),
            default: Arc::new(Rule::default_rule(actions)),
        }
    }
}
