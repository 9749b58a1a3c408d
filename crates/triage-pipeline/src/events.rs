//! Pipeline event system for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (loggers, dashboards, tests) can follow ticket runs
//! without coupling to the engine internals.

use serde::{Deserialize, Serialize};
use triage_types::{StageId, StageStatus};

/// Events emitted while tickets move through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        ticket_id: String,
        run_id: String,
    },
    StageStarted {
        ticket_id: String,
        stage: StageId,
    },
    AttemptFailed {
        ticket_id: String,
        stage: StageId,
        attempt: u32,
        error: String,
        retryable: bool,
    },
    StageCompleted {
        ticket_id: String,
        stage: StageId,
        status: StageStatus,
        attempts: u32,
        duration_ms: u64,
    },
    /// A stage of the graph that the run never reached.
    StageSkipped {
        ticket_id: String,
        stage: StageId,
    },
    RunCompleted {
        ticket_id: String,
        completed_stages: Vec<StageId>,
        duration_ms: u64,
    },
    RunAborted {
        ticket_id: String,
        stage: StageId,
        error: String,
    },
    RunCancelled {
        ticket_id: String,
        completed_stages: Vec<StageId>,
    },
}

impl PipelineEvent {
    pub fn ticket_id(&self) -> &str {
        match self {
            PipelineEvent::RunStarted { ticket_id, .. }
            | PipelineEvent::StageStarted { ticket_id, .. }
            | PipelineEvent::AttemptFailed { ticket_id, .. }
            | PipelineEvent::StageCompleted { ticket_id, .. }
            | PipelineEvent::StageSkipped { ticket_id, .. }
            | PipelineEvent::RunCompleted { ticket_id, .. }
            | PipelineEvent::RunAborted { ticket_id, .. }
            | PipelineEvent::RunCancelled { ticket_id, .. } => ticket_id,
        }
    }
}

/// Event emitter wrapping a broadcast sender.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(PipelineEvent::StageStarted {
            ticket_id: "T-1".into(),
            stage: StageId::Analysis,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            PipelineEvent::StageStarted {
                ticket_id: "T-1".into(),
                stage: StageId::Analysis,
            }
        );
        assert_eq!(event.ticket_id(), "T-1");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(PipelineEvent::StageSkipped {
            ticket_id: "T-2".into(),
            stage: StageId::Response,
        });

        assert_eq!(rx1.recv().await.unwrap(), rx2.recv().await.unwrap());
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(PipelineEvent::RunAborted {
            ticket_id: "T-3".into(),
            stage: StageId::Analysis,
            error: "fallback malformed".into(),
        });
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = PipelineEvent::StageCompleted {
            ticket_id: "T-4".into(),
            stage: StageId::Analysis,
            status: StageStatus::Fallback,
            attempts: 3,
            duration_ms: 12,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "stage_completed");
        assert_eq!(json["stage"], "analysis");
        assert_eq!(json["status"], "fallback");
        assert_eq!(json["attempts"], 3);
    }
}
