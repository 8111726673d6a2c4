//! Live rule matching with atomic rule set replacement.

use super::error::RuleResult;
use super::request::RequestAttributes;
use super::rule::{Rule, RuleSet};
use crate::modules::actions::ActionChain;
use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Matches requests against a listener's rules.
///
/// Readers load the current [`RuleSet`] without locking. Mutations build a
/// new set and swap it in, so a request sees either the old or the new set
/// in full.
#[derive(Debug)]
pub struct RuleEngine {
    set: ArcSwap<RuleSet>,
    writer: Mutex<()>,
}

impl RuleEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(set: RuleSet) -> Self {
        Self {
            set: ArcSwap::from_pointee(set),
            writer: Mutex::new(()),
        }
    }

    /// Get the current rule set.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.set.load_full()
    }

    /// Find the rule for a request.
    #[must_use]
    pub fn match_request(&self, request: &RequestAttributes) -> Arc<Rule> {
        let set = self.set.load();
        let rule = Arc::clone(set.find(request));
        debug!(
            priority = ?rule.priority(),
            path = %request.path,
            "Matched rule"
        );
        rule
    }

    /// Add a rule.
    ///
    /// # Errors
    ///
    /// Returns `DuplicatePriority` if the priority is taken.
    pub fn add_rule(&self, rule: Rule) -> RuleResult<()> {
        let _guard = self.writer.lock().expect("rule writer lock poisoned");
        let priority = rule.priority();
        let next = self.set.load().with_rule(rule)?;
        self.set.store(Arc::new(next));
        info!(priority = ?priority, "Rule added");
        Ok(())
    }

    /// Remove the rule at `priority`.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound` if there is none.
    pub fn remove_rule(&self, priority: u32) -> RuleResult<Arc<Rule>> {
        let _guard = self.writer.lock().expect("rule writer lock poisoned");
        let (next, removed) = self.set.load().without_rule(priority)?;
        self.set.store(Arc::new(next));
        info!(priority, "Rule removed");
        Ok(removed)
    }

    /// Replace the default action chain.
    pub fn set_default(&self, actions: Arc<ActionChain>) {
        let _guard = self.writer.lock().expect("rule writer lock poisoned");
        let next = self.set.load().with_default(actions);
        self.set.store(Arc::new(next));
    }

    /// Replace the whole rule set.
    pub fn replace(&self, set: RuleSet) {
        let _guard = self.writer.lock().expect("rule writer lock poisoned");
        self.set.store(Arc::new(set));
    }
}
