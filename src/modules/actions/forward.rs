//! Forward actions.

use super::config::ForwardConfig;
use super::error::{ActionError, ActionResult};
use crate::modules::target_group::{
    InFlightGuard, SelectionContext, StickyCookie, TargetGroup, TargetGroupResult,
    WeightedTargetGroups,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Forward to one or more weighted target groups.
#[derive(Debug, Clone)]
pub struct ForwardAction {
    groups: WeightedTargetGroups,
}

/// A forwarding decision. The guard holds the target's in-flight slot.
#[derive(Debug)]
pub struct Forwarded {
    /// Chosen group.
    pub group: Arc<TargetGroup>,
    /// In-flight slot on the chosen target.
    pub guard: InFlightGuard,
    /// Stickiness cookies to return to the client.
    pub cookies: Vec<StickyCookie>,
}

impl ForwardAction {
    /// Wrap a weighted group set.
    #[must_use]
    pub fn new(groups: WeightedTargetGroups) -> Self {
        Self { groups }
    }

    /// Resolve a forward configuration against the known groups.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTargetGroup` for a missing group and propagates weight
    /// validation errors.
    pub fn from_config(
        config: &ForwardConfig,
        groups: &HashMap<String, Arc<TargetGroup>>,
    ) -> ActionResult<Self> {
        let entries = config
            .groups()
            .map(|(name, weight)| {
                groups
                    .get(name)
                    .map(|g| (Arc::clone(g), weight))
                    .ok_or_else(|| ActionError::UnknownTargetGroup(name.to_string()))
            })
            .collect::<ActionResult<Vec<_>>>()?;

        Ok(Self::new(WeightedTargetGroups::new(
            entries,
            config.stickiness_duration,
        )?))
    }

    /// Get the weighted groups.
    #[must_use]
    pub fn groups(&self) -> &WeightedTargetGroups {
        &self.groups
    }

    /// Pick a group, then a target within it.
    ///
    /// # Errors
    ///
    /// Returns `NoHealthyTargets` if the chosen group has no healthy target.
    pub fn select(&self, context: &SelectionContext) -> TargetGroupResult<Forwarded> {
        let (group, group_cookie) = self.groups.pick(context);
        let (guard, target_cookie) = group.select(context)?.into_parts();

        Ok(Forwarded {
            group,
            guard,
            cookies: group_cookie.into_iter().chain(target_cookie).collect(),
        })
    }
}
