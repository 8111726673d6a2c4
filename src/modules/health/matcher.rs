//! Success-code matchers for HTTP and gRPC health checks.

use super::error::{HealthError, HealthResult};
use std::ops::RangeInclusive;

/// A set of accepted status codes.
///
/// Parsed from a comma-separated list of codes and inclusive ranges:
/// `"200"`, `"200,302"`, `"200-299"`, `"200-204,301"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    ranges: Vec<RangeInclusive<u32>>,
}

impl Matcher {
    /// Parse an HTTP matcher (codes 200..=499).
    ///
    /// # Errors
    ///
    /// Returns `HealthError::InvalidMatcher` on malformed input.
    pub fn http(spec: &str) -> HealthResult<Self> {
        Self::parse(spec, 200..=499)
    }

    /// Parse a gRPC matcher (codes 0..=99).
    ///
    /// # Errors
    ///
    /// Returns `HealthError::InvalidMatcher` on malformed input.
    pub fn grpc(spec: &str) -> HealthResult<Self> {
        Self::parse(spec, 0..=99)
    }

    fn parse(spec: &str, bounds: RangeInclusive<u32>) -> HealthResult<Self> {
        let invalid = |reason: String| HealthError::InvalidMatcher(spec.to_string(), reason);

        let mut ranges = Vec::new();
        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid("empty code".to_string()));
            }

            let (low, high) = match part.split_once('-') {
                Some((low, high)) => (low.trim(), high.trim()),
                None => (part, part),
            };

            let parse = |s: &str| {
                s.parse::<u32>()
                    .map_err(|_| invalid(format!("'{s}' is not a status code")))
            };
            let (low, high) = (parse(low)?, parse(high)?);

            if low > high {
                return Err(invalid(format!("range {low}-{high} is reversed")));
            }
            if !bounds.contains(&low) || !bounds.contains(&high) {
                return Err(invalid(format!(
                    "codes must be within {}-{}",
                    bounds.start(),
                    bounds.end()
                )));
            }

            ranges.push(low..=high);
        }

        Ok(Self { ranges })
    }

    /// Check whether a code is accepted.
    #[must_use]
    pub fn matches(&self, code: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(&code))
    }
}
