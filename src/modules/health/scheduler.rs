//! Periodic health check scheduling.
//!
//! One task per (target group, target). Each task checks its target, sleeps
//! for the group's current interval and repeats; it exits when the target
//! or group disappears or the scheduler stops. Checks never run on request
//! serving paths.

use super::error::HealthError;
use super::registry::HealthRegistry;
use crate::modules::target_group::TargetId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Interval used while a group has checks turned off, to notice when they
/// are turned back on.
const DISABLED_POLL: Duration = Duration::from_secs(5);

/// Spawns and tracks health check tasks.
#[derive(Debug)]
pub struct HealthScheduler {
    registry: Arc<HealthRegistry>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<HashMap<(String, TargetId), JoinHandle<()>>>,
}

impl HealthScheduler {
    /// Create a scheduler over a registry. Nothing runs until [`sync`].
    ///
    /// [`sync`]: HealthScheduler::sync
    #[must_use]
    pub fn new(registry: Arc<HealthRegistry>) -> Self {
        Self {
            registry,
            shutdown: watch::Sender::new(false),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Start tasks for targets that have none. Call after registering
    /// targets. Must be called inside a tokio runtime. Returns the number of
    /// tasks started.
    pub fn sync(&self) -> usize {
        if *self.shutdown.borrow() {
            return 0;
        }

        let mut tasks = self.tasks.lock().expect("tasks lock poisoned");
        tasks.retain(|_, handle| !handle.is_finished());

        let mut started = 0;
        for group in self.registry.groups() {
            if !group.target_type().is_addressable() {
                continue;
            }
            for target in group.targets() {
                let key = (group.name().to_string(), target.id());
                if tasks.contains_key(&key) {
                    continue;
                }

                let handle = tokio::spawn(run_checks(
                    Arc::clone(&self.registry),
                    key.0.clone(),
                    key.1,
                    self.shutdown.subscribe(),
                ));
                tasks.insert(key, handle);
                started += 1;
            }
        }

        if started > 0 {
            debug!(started, total = tasks.len(), "Health check tasks started");
        }
        started
    }

    /// Get the number of live tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks
            .lock()
            .expect("tasks lock poisoned")
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Stop all tasks.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        let mut tasks = self.tasks.lock().expect("tasks lock poisoned");
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
        info!("Health check scheduler stopped");
    }
}

impl Drop for HealthScheduler {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn run_checks(
    registry: Arc<HealthRegistry>,
    group: String,
    target: TargetId,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(group = %group, target = %target, "Health check task started");

    loop {
        let interval = match registry.run_health_check(&group, target).await {
            Ok(result) => {
                if result.transitioned() {
                    debug!(
                        group = %group,
                        target = %target,
                        state = %result.state,
                        "Scheduled check changed target health"
                    );
                }
                match registry.group(&group) {
                    Ok(g) => g.health_check().interval,
                    Err(_) => break,
                }
            },
            Err(HealthError::ChecksDisabled(_)) => DISABLED_POLL,
            Err(HealthError::GroupNotFound(_) | HealthError::TargetNotFound { .. }) => break,
            Err(HealthError::TargetGroup(e)) => {
                debug!(group = %group, target = %target, error = %e, "Target gone");
                break;
            },
            Err(e) => {
                warn!(group = %group, target = %target, error = %e, "Health check error");
                DISABLED_POLL
            },
        };

        tokio::select! {
            _ = shutdown.wait_for(|stopped| *stopped) => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!(group = %group, target = %target, "Health check task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::health::{HealthCheckProtocol, TargetHealth};
    use crate::modules::target_group::{TargetGroup, TargetGroupConfig, TargetProtocol, TargetSpec};
    use std::time::Instant;
    use tokio::net::TcpListener;

    async fn setup() -> (Arc<HealthRegistry>, TargetId, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut config = TargetGroupConfig::new("tcp", TargetProtocol::Tcp, port);
        config.health_check.protocol = HealthCheckProtocol::Tcp;
        config.health_check.interval = Duration::from_secs(5);
        config.health_check.timeout = Duration::from_secs(2);
        config.health_check.healthy_threshold = 2;
        config.deregistration_delay = Duration::ZERO;

        let registry = Arc::new(HealthRegistry::new());
        registry
            .add_group(Arc::new(TargetGroup::new(&config, Arc::default()).unwrap()))
            .unwrap();
        let id = registry
            .register_target("tcp", TargetSpec::new("127.0.0.1"))
            .unwrap();
        (registry, id, listener)
    }

    #[tokio::test]
    async fn test_scheduled_checks_mark_healthy() {
        let (registry, id, _listener) = setup().await;
        let scheduler = HealthScheduler::new(Arc::clone(&registry));
        assert_eq!(scheduler.sync(), 1);
        assert_eq!(scheduler.sync(), 0);

        let group = registry.group("tcp").unwrap();
        let deadline = Instant::now() + Duration::from_secs(15);
        while group.target(id).unwrap().health() != TargetHealth::Healthy {
            assert!(Instant::now() < deadline, "target never became healthy");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        scheduler.stop();
        assert_eq!(scheduler.task_count(), 0);
    }

    #[tokio::test]
    async fn test_task_exits_when_target_removed() {
        let (registry, id, _listener) = setup().await;
        let scheduler = HealthScheduler::new(Arc::clone(&registry));
        scheduler.sync();

        registry.deregister("tcp", id).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while scheduler.task_count() > 0 {
            assert!(Instant::now() < deadline, "task did not exit");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
