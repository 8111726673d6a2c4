//! # Target Groups
//!
//! A target group is a named pool of targets with a selection algorithm and
//! an optional stickiness policy.
//!
//! Registration state lives in an arena of [`Target`] records with stable
//! [`TargetId`]s. Selection reads an immutable [`ActiveSet`] of healthy
//! targets that is swapped copy-on-write on every membership or health
//! change, so a request never observes a half-applied update and the hot
//! path touches only atomics.

mod config;
mod error;
mod group;
mod stickiness;
mod strategy;
mod target;
mod weighted;

pub use config::{
    validate_stickiness_duration, Algorithm, StickinessConfig, StickinessKind, TargetGroupConfig,
    TargetProtocol, TargetResolver, TargetSpec, TargetType, MAX_DEREGISTRATION_DELAY,
    MAX_STICKINESS,
};
pub use error::{TargetGroupError, TargetGroupResult};
pub use group::{
    ActiveSet, Deregistration, Selection, SelectionContext, TargetGroup, TargetHealthDescription,
};
pub use stickiness::{Stickiness, StickyCookie, APP_COOKIE, GROUP_COOKIE, LB_COOKIE};
pub use strategy::{create_strategy, LeastOutstandingRequests, RoundRobin, Strategy};
pub use target::{InFlightGuard, Target, TargetId, TargetStats};
pub use weighted::{WeightedTargetGroups, MAX_WEIGHT};
