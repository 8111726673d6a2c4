//! Weighted selection across several target groups.

use super::config::validate_stickiness_duration;
use super::error::{TargetGroupError, TargetGroupResult};
use super::group::{SelectionContext, TargetGroup};
use super::stickiness::{decode_claim, encode_claim, StickyCookie, GROUP_COOKIE};
use rand::RngExt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Largest allowed weight.
pub const MAX_WEIGHT: u32 = 999;

/// Target groups with relative weights.
///
/// Weight 0 takes a group out of rotation. A single group is always chosen
/// regardless of its weight.
#[derive(Debug, Clone)]
pub struct WeightedTargetGroups {
    entries: Vec<(Arc<TargetGroup>, u32)>,
    total: u32,
    stickiness: Option<Duration>,
}

impl WeightedTargetGroups {
    /// Build a weighted set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the set is empty, a weight exceeds 999,
    /// all weights are zero, a group appears twice, or the stickiness
    /// duration is out of range.
    pub fn new(
        entries: Vec<(Arc<TargetGroup>, u32)>,
        stickiness: Option<Duration>,
    ) -> TargetGroupResult<Self> {
        let invalid = |msg: String| Err(TargetGroupError::InvalidConfig(msg));

        if entries.is_empty() {
            return invalid("forward requires at least one target group".to_string());
        }

        for (i, (group, weight)) in entries.iter().enumerate() {
            if *weight > MAX_WEIGHT {
                return invalid(format!(
                    "weight of target group '{}' must be 0..=999, got {weight}",
                    group.name()
                ));
            }
            if entries[..i].iter().any(|(g, _)| g.name() == group.name()) {
                return invalid(format!(
                    "target group '{}' listed twice in forward",
                    group.name()
                ));
            }
        }

        let total = entries.iter().map(|(_, w)| *w).sum();
        if entries.len() > 1 && total == 0 {
            return invalid("at least one target group needs a weight above zero".to_string());
        }

        if let Some(duration) = stickiness {
            validate_stickiness_duration(duration)?;
        }

        Ok(Self {
            entries,
            total,
            stickiness,
        })
    }

    /// Forward to a single group.
    #[must_use]
    pub fn single(group: Arc<TargetGroup>) -> Self {
        Self {
            entries: vec![(group, 1)],
            total: 1,
            stickiness: None,
        }
    }

    /// Get the groups and their weights.
    #[must_use]
    pub fn entries(&self) -> &[(Arc<TargetGroup>, u32)] {
        &self.entries
    }

    /// Pick a group. Honors a valid group-stickiness cookie naming a group
    /// with non-zero weight.
    pub fn pick(&self, context: &SelectionContext) -> (Arc<TargetGroup>, Option<StickyCookie>) {
        let now = SystemTime::now();

        let pinned = self.stickiness.and_then(|_| {
            let claim = decode_claim(context.cookies.get(GROUP_COOKIE)?, now)?;
            let [name] = claim.as_slice() else {
                return None;
            };
            self.entries
                .iter()
                .find(|(g, w)| g.name() == name.as_str() && (*w > 0 || self.entries.len() == 1))
                .map(|(g, _)| Arc::clone(g))
        });

        let group = match pinned {
            Some(group) => group,
            None => self.pick_weighted(),
        };

        let cookie = self.stickiness.map(|duration| StickyCookie {
            name: GROUP_COOKIE.to_string(),
            value: encode_claim(&[group.name()], now + duration),
            max_age: duration,
            requires_app_cookie: None,
        });

        (group, cookie)
    }

    fn pick_weighted(&self) -> Arc<TargetGroup> {
        if self.entries.len() == 1 || self.total == 0 {
            return Arc::clone(&self.entries[0].0);
        }

        let mut point = rand::rng().random_range(0..self.total);
        for (group, weight) in &self.entries {
            if point < *weight {
                debug!(group = %group.name(), weight, "Picked weighted target group");
                return Arc::clone(group);
            }
            point -= weight;
        }

        Arc::clone(&self.entries[self.entries.len() - 1].0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::target_group::config::{TargetGroupConfig, TargetProtocol};
    use std::collections::HashMap;

    fn group(name: &str) -> Arc<TargetGroup> {
        let config = TargetGroupConfig::new(name, TargetProtocol::Http, 80);
        Arc::new(TargetGroup::new(&config, Arc::default()).unwrap())
    }

    #[test]
    fn test_validation() {
        assert!(WeightedTargetGroups::new(vec![], None).is_err());
        assert!(WeightedTargetGroups::new(vec![(group("a"), 1000)], None).is_err());
        assert!(
            WeightedTargetGroups::new(vec![(group("a"), 0), (group("b"), 0)], None).is_err()
        );
        assert!(
            WeightedTargetGroups::new(vec![(group("a"), 1), (group("a"), 1)], None).is_err()
        );
        assert!(WeightedTargetGroups::new(
            vec![(group("a"), 1), (group("b"), 1)],
            Some(Duration::from_secs(8 * 24 * 3600))
        )
        .is_err());
        assert!(WeightedTargetGroups::new(vec![(group("a"), 0)], None).is_ok());
    }

    #[test]
    fn test_zero_weight_excluded() {
        let set =
            WeightedTargetGroups::new(vec![(group("blue"), 0), (group("green"), 5)], None).unwrap();
        for _ in 0..200 {
            let (picked, cookie) = set.pick(&SelectionContext::new());
            assert_eq!(picked.name(), "green");
            assert!(cookie.is_none());
        }
    }

    #[test]
    fn test_weights_split_traffic() {
        let set =
            WeightedTargetGroups::new(vec![(group("blue"), 1), (group("green"), 3)], None).unwrap();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..4000 {
            let (picked, _) = set.pick(&SelectionContext::new());
            *counts.entry(picked.name().to_string()).or_default() += 1;
        }
        let blue = counts["blue"];
        assert!((700..1300).contains(&blue), "blue picked {blue} times");
    }

    #[test]
    fn test_group_stickiness() {
        let set = WeightedTargetGroups::new(
            vec![(group("blue"), 1), (group("green"), 1)],
            Some(Duration::from_secs(300)),
        )
        .unwrap();

        let (first, cookie) = set.pick(&SelectionContext::new());
        let cookie = cookie.unwrap();
        assert_eq!(cookie.name, GROUP_COOKIE);

        let context = SelectionContext::new().with_cookie(GROUP_COOKIE, cookie.value);
        for _ in 0..50 {
            assert_eq!(set.pick(&context).0.name(), first.name());
        }
    }
}
