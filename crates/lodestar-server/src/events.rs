//! Execution event hub: per-execution serialized fan-out plus status
//! persistence.
//!
//! Events arrive from the task worker through the event ingress, are
//! applied to the execution resource's status (phase, task records,
//! messages) by direct store save, and are then broadcast to every
//! subscriber of that execution. Ordering holds per execution because one
//! `publish` call finishes persisting before the next event of the same
//! stream is read; there is no ordering across executions.

use std::collections::HashMap;

use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

use lodestar_core::Actor;
use lodestar_proto::ApiResource;
use lodestar_proto::v1::{
    AgentExecution, ExecutionEvent, TaskRecord, WorkflowExecution, execution_event,
};
use lodestar_store::ResourceStore;

/// Capacity of each per-execution broadcast channel. Subscribers that lag
/// past this lose non-critical events (broadcast drops oldest).
const CHANNEL_CAPACITY: usize = 256;

/// Per-execution event fan-out.
pub struct ExecutionEventHub {
    store: ResourceStore,
    channels: RwLock<HashMap<String, broadcast::Sender<ExecutionEvent>>>,
}

impl ExecutionEventHub {
    /// Create a hub over the store.
    #[must_use]
    pub fn new(store: ResourceStore) -> Self {
        Self {
            store,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to one execution's event stream.
    pub async fn subscribe(&self, execution_id: &str) -> broadcast::Receiver<ExecutionEvent> {
        self.sender(execution_id).await.subscribe()
    }

    async fn sender(&self, execution_id: &str) -> broadcast::Sender<ExecutionEvent> {
        if let Some(sender) = self.channels.read().await.get(execution_id) {
            return sender.clone();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(execution_id.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Apply an event to the execution resource and fan it out.
    pub async fn publish(&self, event: ExecutionEvent) {
        if let Err(e) = self.persist(&event).await {
            warn!(execution_id = %event.execution_id, error = %e, "event persistence failed");
        }
        let sender = self.sender(&event.execution_id).await;
        // No receivers is fine; the execution simply runs unobserved.
        let _ = sender.send(event);
    }

    /// Drop a terminal execution's channel.
    pub async fn forget(&self, execution_id: &str) {
        self.channels.write().await.remove(execution_id);
    }

    async fn persist(&self, event: &ExecutionEvent) -> Result<(), lodestar_store::StoreError> {
        // The id prefix decides which execution kind this event belongs to.
        if event.execution_id.starts_with("aex-") {
            self.persist_agent(event).await
        } else if event.execution_id.starts_with("wfe-") {
            self.persist_workflow(event).await
        } else {
            debug!(execution_id = %event.execution_id, "event for unknown execution kind");
            Ok(())
        }
    }

    async fn persist_agent(&self, event: &ExecutionEvent) -> Result<(), lodestar_store::StoreError> {
        let Some(mut execution) = self
            .store
            .try_get::<AgentExecution>(&event.execution_id)
            .await?
        else {
            return Ok(());
        };
        let status = execution.status.get_or_insert_default();
        match &event.event {
            Some(execution_event::Event::PhaseTransition(transition)) => {
                status.phase = transition.to;
            }
            Some(execution_event::Event::AgentMessage(message)) => {
                status.messages.push(message.clone());
            }
            Some(execution_event::Event::Error(error)) => {
                status.error = error.message.clone();
            }
            _ => return Ok(()),
        }
        self.touch_and_save(&mut execution).await
    }

    async fn persist_workflow(
        &self,
        event: &ExecutionEvent,
    ) -> Result<(), lodestar_store::StoreError> {
        let Some(mut execution) = self
            .store
            .try_get::<WorkflowExecution>(&event.execution_id)
            .await?
        else {
            return Ok(());
        };
        let status = execution.status.get_or_insert_default();
        match &event.event {
            Some(execution_event::Event::PhaseTransition(transition)) => {
                status.phase = transition.to;
            }
            Some(execution_event::Event::TaskEvent(task)) => {
                match status.tasks.iter_mut().find(|t| t.name == task.task_name) {
                    Some(record) => {
                        record.phase = task.phase;
                        if !task.output.is_empty() {
                            record.output = task.output.clone();
                        }
                    }
                    None => status.tasks.push(TaskRecord {
                        name: task.task_name.clone(),
                        phase: task.phase,
                        output: task.output.clone(),
                        error: String::new(),
                    }),
                }
            }
            Some(execution_event::Event::Error(error)) => {
                status.error = error.message.clone();
            }
            _ => return Ok(()),
        }
        self.touch_and_save(&mut execution).await
    }

    async fn touch_and_save<R: ApiResource>(
        &self,
        resource: &mut R,
    ) -> Result<(), lodestar_store::StoreError> {
        let audit = resource.status_audit_mut();
        audit.updated_by = Actor::system().principal;
        audit.updated_at = chrono::Utc::now().to_rfc3339();
        self.store.save(resource).await
    }
}

impl std::fmt::Debug for ExecutionEventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEventHub").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestar_proto::v1::{
        AgentExecutionSpec, ExecutionPhase, Metadata, PhaseTransition, TaskEvent,
        WorkflowExecutionSpec,
    };
    use lodestar_store::MemoryKvStore;

    fn hub() -> ExecutionEventHub {
        ExecutionEventHub::new(ResourceStore::new(MemoryKvStore::shared()))
    }

    fn phase_event(execution_id: &str, to: ExecutionPhase) -> ExecutionEvent {
        ExecutionEvent {
            execution_id: execution_id.into(),
            unix_ms: 0,
            event: Some(execution_event::Event::PhaseTransition(PhaseTransition {
                from: ExecutionPhase::Pending as i32,
                to: to as i32,
            })),
        }
    }

    #[tokio::test]
    async fn test_phase_transition_persisted_for_agent_execution() {
        let hub = hub();
        let execution = AgentExecution {
            metadata: Some(Metadata {
                id: "aex-1".into(),
                slug: "run-1".into(),
                ..Metadata::default()
            }),
            spec: Some(AgentExecutionSpec::default()),
            status: None,
        };
        hub.store.save(&execution).await.unwrap();

        hub.publish(phase_event("aex-1", ExecutionPhase::Running)).await;

        let loaded: AgentExecution = hub.store.get("aex-1").await.unwrap();
        assert_eq!(loaded.status.unwrap().phase(), ExecutionPhase::Running);
    }

    #[tokio::test]
    async fn test_task_events_upsert_records() {
        let hub = hub();
        let execution = WorkflowExecution {
            metadata: Some(Metadata {
                id: "wfe-1".into(),
                slug: "run-1".into(),
                ..Metadata::default()
            }),
            spec: Some(WorkflowExecutionSpec::default()),
            status: None,
        };
        hub.store.save(&execution).await.unwrap();

        for (phase, output) in [
            (ExecutionPhase::Running, ""),
            (ExecutionPhase::Completed, "{\"title\":\"x\"}"),
        ] {
            hub.publish(ExecutionEvent {
                execution_id: "wfe-1".into(),
                unix_ms: 0,
                event: Some(execution_event::Event::TaskEvent(TaskEvent {
                    task_name: "fetchData".into(),
                    phase: phase as i32,
                    output: output.into(),
                })),
            })
            .await;
        }

        let loaded: WorkflowExecution = hub.store.get("wfe-1").await.unwrap();
        let status = loaded.status.unwrap();
        assert_eq!(status.tasks.len(), 1);
        assert_eq!(status.tasks[0].phase(), ExecutionPhase::Completed);
        assert_eq!(status.tasks[0].output, "{\"title\":\"x\"}");
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let hub = hub();
        let mut receiver = hub.subscribe("aex-9").await;

        hub.publish(phase_event("aex-9", ExecutionPhase::Running)).await;
        hub.publish(phase_event("aex-9", ExecutionPhase::Completed)).await;

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        match (first.event, second.event) {
            (
                Some(execution_event::Event::PhaseTransition(a)),
                Some(execution_event::Event::PhaseTransition(b)),
            ) => {
                assert_eq!(a.to(), ExecutionPhase::Running);
                assert_eq!(b.to(), ExecutionPhase::Completed);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_events_for_unknown_execution_do_not_error() {
        let hub = hub();
        hub.publish(phase_event("aex-missing", ExecutionPhase::Running)).await;
        hub.publish(phase_event("unknown-prefix", ExecutionPhase::Running)).await;
    }
}
