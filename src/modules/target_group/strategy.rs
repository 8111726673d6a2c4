//! Target selection algorithms.
//!
//! Strategies pick from the group's active snapshot: the healthy targets in
//! registration order. They hold only atomics, so selection never locks.

use super::config::Algorithm;
use super::target::Target;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Picks one target out of a non-empty healthy set.
pub trait Strategy: Send + Sync + std::fmt::Debug {
    /// Return the index of the chosen target, or `None` if `targets` is empty.
    fn select(&self, targets: &[Arc<Target>]) -> Option<usize>;

    /// Get the strategy name.
    fn name(&self) -> &'static str;
}

/// Build the strategy for an algorithm.
#[must_use]
pub fn create_strategy(algorithm: Algorithm) -> Box<dyn Strategy> {
    match algorithm {
        Algorithm::RoundRobin => Box::new(RoundRobin::new()),
        Algorithm::LeastOutstandingRequests => Box::new(LeastOutstandingRequests::new()),
    }
}

/// Round-robin over the healthy set.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    /// Create a new round-robin strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RoundRobin {
    fn select(&self, targets: &[Arc<Target>]) -> Option<usize> {
        if targets.is_empty() {
            return None;
        }
        Some(self.cursor.fetch_add(1, Ordering::Relaxed) % targets.len())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Fewest in-flight requests. Among equally loaded targets the scan starts
/// at a rotating offset, so ties resolve in round-robin order.
#[derive(Debug, Default)]
pub struct LeastOutstandingRequests {
    cursor: AtomicUsize,
}

impl LeastOutstandingRequests {
    /// Create a new least-outstanding-requests strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for LeastOutstandingRequests {
    fn select(&self, targets: &[Arc<Target>]) -> Option<usize> {
        let len = targets.len();
        if len == 0 {
            return None;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        let mut best = start;
        let mut best_load = targets[start].in_flight();

        for offset in 1..len {
            if best_load == 0 {
                break;
            }
            let idx = (start + offset) % len;
            let load = targets[idx].in_flight();
            if load < best_load {
                best = idx;
                best_load = load;
            }
        }

        Some(best)
    }

    fn name(&self) -> &'static str {
        "least_outstanding_requests"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::target_group::config::{TargetSpec, TargetType};
    use crate::modules::target_group::target::{InFlightGuard, TargetId};

    fn targets(n: u64) -> Vec<Arc<Target>> {
        (0..n)
            .map(|i| {
                Arc::new(Target::new(
                    TargetId(i),
                    TargetSpec::new(format!("10.0.0.{}", i + 1)),
                    TargetType::Ip,
                    None,
                    true,
                ))
            })
            .collect()
    }

    #[test]
    fn test_round_robin_cycles() {
        let targets = targets(3);
        let rr = RoundRobin::new();
        let picks: Vec<_> = (0..6).map(|_| rr.select(&targets).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(rr.select(&[]), None);
    }

    #[test]
    fn test_lor_prefers_idle() {
        let targets = targets(3);
        let _busy0 = InFlightGuard::new(Arc::clone(&targets[0]));
        let _busy2a = InFlightGuard::new(Arc::clone(&targets[2]));
        let _busy2b = InFlightGuard::new(Arc::clone(&targets[2]));

        let lor = LeastOutstandingRequests::new();
        for _ in 0..5 {
            assert_eq!(lor.select(&targets), Some(1));
        }
    }

    #[test]
    fn test_lor_ties_rotate() {
        let targets = targets(3);
        let lor = LeastOutstandingRequests::new();
        let picks: Vec<_> = (0..3).map(|_| lor.select(&targets).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2]);
    }

    #[test]
    fn test_names() {
        assert_eq!(create_strategy(Algorithm::RoundRobin).name(), "round_robin");
        assert_eq!(
            create_strategy(Algorithm::LeastOutstandingRequests).name(),
            "least_outstanding_requests"
        );
    }
}
