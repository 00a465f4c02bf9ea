//! The component supervisor: declared-order startup, periodic health
//! evaluation, and backoff-bounded restarts.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

use crate::component::{Component, ComponentState, ComponentStatus, RestartPolicy};
use crate::error::{SupervisorError, SupervisorResult};

/// How often every running component is health-checked.
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(10);

struct Entry {
    component: Arc<dyn Component>,
    policy: RestartPolicy,
    state: ComponentState,
    /// Instants of recent restarts, pruned to the sliding window.
    restarts: VecDeque<Instant>,
}

impl Entry {
    fn prune_window(&mut self) {
        let window = self.policy.window;
        while let Some(front) = self.restarts.front() {
            if front.elapsed() > window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Owns the managed components. The table lock is held only for brief
/// state reads and writes, never across `start`/`stop`/`healthy` calls.
pub struct Supervisor {
    entries: Mutex<Vec<Entry>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    /// Create an empty supervisor.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            entries: Mutex::new(Vec::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Register a component. Registration order is dependency order:
    /// `start_all` starts first-to-last, shutdown stops last-to-first.
    pub async fn register(&self, component: Arc<dyn Component>, policy: RestartPolicy) {
        let mut entries = self.entries.lock().await;
        entries.push(Entry {
            component,
            policy,
            state: ComponentState::Stopped,
            restarts: VecDeque::new(),
        });
    }

    /// Start every registered component in declared order.
    ///
    /// # Errors
    ///
    /// Fails fast on the first required component that cannot start;
    /// optional component failures only log a warning.
    pub async fn start_all(&self) -> SupervisorResult<()> {
        let components: Vec<(Arc<dyn Component>, bool)> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .map(|e| (Arc::clone(&e.component), e.component.required()))
                .collect()
        };

        for (index, (component, required)) in components.into_iter().enumerate() {
            let name = component.name().to_owned();
            info!(component = %name, "starting component");
            match component.start().await {
                Ok(()) => {
                    let mut entries = self.entries.lock().await;
                    if let Some(entry) = entries.get_mut(index) {
                        entry.state = ComponentState::Running;
                    }
                }
                Err(e) if required => {
                    return Err(SupervisorError::ComponentFailed {
                        name,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(component = %name, error = %e, "optional component failed to start");
                }
            }
        }
        Ok(())
    }

    /// Spawn the background health monitor. Runs until [`Supervisor::shutdown`].
    #[must_use]
    pub fn spawn_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let supervisor = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => supervisor.check_once().await,
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Evaluate health of every running component and restart unhealthy
    /// ones within their budgets.
    pub async fn check_once(&self) {
        let running: Vec<(usize, Arc<dyn Component>)> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.state == ComponentState::Running)
                .map(|(i, e)| (i, Arc::clone(&e.component)))
                .collect()
        };

        for (index, component) in running {
            if component.healthy().await {
                continue;
            }
            let name = component.name().to_owned();
            warn!(component = %name, "component unhealthy");
            self.restart(index, &component).await;
        }
    }

    async fn restart(&self, index: usize, component: &Arc<dyn Component>) {
        let name = component.name().to_owned();

        // Budget check under the lock; the actual restart runs outside it.
        let delay = {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get_mut(index) else {
                return;
            };
            entry.prune_window();
            let attempt = u32::try_from(entry.restarts.len()).unwrap_or(u32::MAX);
            if attempt >= entry.policy.max_restarts {
                error!(
                    component = %name,
                    attempts = attempt,
                    "restart budget exhausted — marking permanently failed"
                );
                entry.state = ComponentState::Failed;
                return;
            }
            entry.state = ComponentState::Restarting;
            entry.restarts.push_back(Instant::now());
            entry.policy.backoff.delay_for_attempt(attempt)
        };

        if let Err(e) = component.stop().await {
            warn!(component = %name, error = %e, "stop before restart failed");
        }
        tokio::time::sleep(delay).await;

        match component.start().await {
            Ok(()) => {
                info!(component = %name, "component restarted");
                let mut entries = self.entries.lock().await;
                if let Some(entry) = entries.get_mut(index) {
                    entry.state = ComponentState::Running;
                }
            }
            Err(e) => {
                // Leave state at Restarting; the next tick will retry and
                // the window will eventually exhaust the budget.
                warn!(component = %name, error = %e, "restart attempt failed");
            }
        }
    }

    /// Snapshot component states for `server status`.
    pub async fn status(&self) -> Vec<ComponentStatus> {
        let mut entries = self.entries.lock().await;
        entries
            .iter_mut()
            .map(|e| {
                e.prune_window();
                ComponentStatus {
                    name: e.component.name().to_owned(),
                    state: e.state,
                    recent_restarts: u32::try_from(e.restarts.len()).unwrap_or(u32::MAX),
                    required: e.component.required(),
                }
            })
            .collect()
    }

    /// Stop the monitor and every component, in reverse declared order.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let components: Vec<Arc<dyn Component>> = {
            let mut entries = self.entries.lock().await;
            for entry in entries.iter_mut() {
                entry.state = ComponentState::Stopped;
            }
            entries.iter().rev().map(|e| Arc::clone(&e.component)).collect()
        };
        for component in components {
            let name = component.name().to_owned();
            if let Err(e) = component.stop().await {
                warn!(component = %name, error = %e, "component stop failed during shutdown");
            } else {
                info!(component = %name, "component stopped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FlakyComponent {
        name: String,
        healthy: AtomicBool,
        starts: AtomicU32,
        stops: AtomicU32,
        fail_start: AtomicBool,
    }

    impl FlakyComponent {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_owned(),
                healthy: AtomicBool::new(true),
                starts: AtomicU32::new(0),
                stops: AtomicU32::new(0),
                fail_start: AtomicBool::new(false),
            })
        }
    }

    #[async_trait::async_trait]
    impl Component for FlakyComponent {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self) -> SupervisorResult<()> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(SupervisorError::Spawn {
                    name: self.name.clone(),
                    reason: "boom".to_owned(),
                });
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.healthy.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> SupervisorResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn fast_policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy {
            backoff: lodestar_core::BackoffSchedule::new(
                Duration::from_millis(1),
                Duration::from_millis(2),
            ),
            max_restarts,
            window: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_start_all_in_order() {
        let supervisor = Supervisor::new();
        let a = FlakyComponent::new("a");
        let b = FlakyComponent::new("b");
        supervisor.register(a.clone(), fast_policy(3)).await;
        supervisor.register(b.clone(), fast_policy(3)).await;
        supervisor.start_all().await.unwrap();
        assert_eq!(a.starts.load(Ordering::SeqCst), 1);
        assert_eq!(b.starts.load(Ordering::SeqCst), 1);
        let status = supervisor.status().await;
        assert!(status.iter().all(|s| s.state == ComponentState::Running));
    }

    #[tokio::test]
    async fn test_required_failure_fails_fast() {
        let supervisor = Supervisor::new();
        let a = FlakyComponent::new("a");
        a.fail_start.store(true, Ordering::SeqCst);
        supervisor.register(a, fast_policy(3)).await;
        assert!(supervisor.start_all().await.is_err());
    }

    #[tokio::test]
    async fn test_unhealthy_component_is_restarted() {
        let supervisor = Supervisor::new();
        let a = FlakyComponent::new("a");
        supervisor.register(a.clone(), fast_policy(3)).await;
        supervisor.start_all().await.unwrap();

        a.healthy.store(false, Ordering::SeqCst);
        supervisor.check_once().await;

        assert_eq!(a.stops.load(Ordering::SeqCst), 1);
        assert_eq!(a.starts.load(Ordering::SeqCst), 2);
        let status = supervisor.status().await;
        assert_eq!(status[0].state, ComponentState::Running);
        assert_eq!(status[0].recent_restarts, 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_marks_failed() {
        let supervisor = Supervisor::new();
        let a = FlakyComponent::new("a");
        supervisor.register(a.clone(), fast_policy(2)).await;
        supervisor.start_all().await.unwrap();

        // Each check finds it unhealthy again; after 2 restarts the budget
        // is spent and the third check marks it failed.
        for _ in 0..3 {
            a.healthy.store(false, Ordering::SeqCst);
            supervisor.check_once().await;
        }

        let status = supervisor.status().await;
        assert_eq!(status[0].state, ComponentState::Failed);

        // Failed components are no longer checked or restarted.
        let starts_before = a.starts.load(Ordering::SeqCst);
        supervisor.check_once().await;
        assert_eq!(a.starts.load(Ordering::SeqCst), starts_before);
    }

    #[tokio::test]
    async fn test_shutdown_stops_in_reverse_order() {
        let supervisor = Supervisor::new();
        let a = FlakyComponent::new("a");
        let b = FlakyComponent::new("b");
        supervisor.register(a.clone(), fast_policy(3)).await;
        supervisor.register(b.clone(), fast_policy(3)).await;
        supervisor.start_all().await.unwrap();
        supervisor.shutdown().await;
        assert_eq!(a.stops.load(Ordering::SeqCst), 1);
        assert_eq!(b.stops.load(Ordering::SeqCst), 1);
        let status = supervisor.status().await;
        assert!(status.iter().all(|s| s.state == ComponentState::Stopped));
    }
}
