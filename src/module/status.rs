//! Component status reporting.

/// Current status of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleStatus {
    /// Configuration applied, not yet serving.
    Initializing,

    /// Serving traffic.
    Running,

    /// Serving, but part of the component is impaired (for example a target
    /// group with no healthy targets).
    Degraded {
        /// Why the component is degraded.
        reason: String,
    },

    /// Not serving.
    Stopped,

    /// Failed and not serving.
    Error {
        /// Error message.
        message: String,
    },
}

impl ModuleStatus {
    /// Returns `true` when fully healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns `true` when serving traffic (possibly degraded).
    #[must_use]
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Running | Self::Degraded { .. })
    }

    /// Returns `true` when stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Degraded { reason } => write!(f, "degraded: {reason}"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error { message } => write!(f, "error: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(ModuleStatus::Running.is_healthy());
        assert!(ModuleStatus::Running.is_operational());

        let degraded = ModuleStatus::Degraded {
            reason: "group 'api' has no healthy targets".to_string(),
        };
        assert!(!degraded.is_healthy());
        assert!(degraded.is_operational());
        assert_eq!(
            degraded.to_string(),
            "degraded: group 'api' has no healthy targets"
        );

        assert!(ModuleStatus::Stopped.is_stopped());
        assert!(!ModuleStatus::Initializing.is_operational());
    }
}
