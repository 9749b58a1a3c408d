//! Pipeline engine: the per-ticket traversal loop.
//!
//! Starting from the graph entry, each stage runs through its
//! [`StageExecutor`], the result lands in the [`TicketState`], and
//! [`select_edge`] picks where to go next. The run ends on an `exit` edge or
//! when no edge matches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use triage_llm::Generator;
use triage_types::{
    Result, RunPhase, StageId, StageRecord, StageStatus, TicketState, TriageError,
};

use crate::condition::resolve_state_key;
use crate::config::PipelineConfig;
use crate::edge_selection::select_edge;
use crate::events::{EventEmitter, PipelineEvent};
use crate::executor::StageExecutor;
use crate::graph::{EdgeTarget, PipelineGraph};
use crate::retry::BackoffPolicy;

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag, checked before each stage starts.
///
/// An attempt already in flight is allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// PipelineEngine
// ---------------------------------------------------------------------------

pub struct PipelineEngine {
    graph: Arc<PipelineGraph>,
    generator: Arc<dyn Generator>,
    analysis: StageExecutor,
    response: StageExecutor,
    emitter: EventEmitter,
}

impl PipelineEngine {
    pub fn new(
        graph: Arc<PipelineGraph>,
        generator: Arc<dyn Generator>,
        config: &PipelineConfig,
        emitter: EventEmitter,
    ) -> Self {
        let backoff = BackoffPolicy::from(&config.backoff);
        let executor = |stage: StageId| {
            StageExecutor::from_config(config.stage(stage), backoff.clone())
                .with_emitter(emitter.clone())
        };
        Self {
            analysis: executor(StageId::Analysis),
            response: executor(StageId::Response),
            graph,
            generator,
            emitter,
        }
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    fn executor(&self, stage: StageId) -> &StageExecutor {
        match stage {
            StageId::Analysis => &self.analysis,
            StageId::Response => &self.response,
        }
    }

    /// Drive one ticket through the graph.
    ///
    /// Returns the sealed state on completion. A malformed fallback or a
    /// failed request build aborts the run with [`TriageError::Aborted`];
    /// a cancelled token yields [`TriageError::Cancelled`].
    pub async fn run(&self, mut state: TicketState, cancel: &CancelToken) -> Result<TicketState> {
        let start = Instant::now();
        let ticket_id = state.ticket().id.clone();
        let entry = self
            .graph
            .entry()
            .ok_or_else(|| TriageError::GraphInvalid("pipeline has no entry stage".into()))?;

        tracing::info!(ticket = %ticket_id, run_id = %state.run_id(), generator = self.generator.name(), "Run started");
        self.emitter.emit(PipelineEvent::RunStarted {
            ticket_id: ticket_id.clone(),
            run_id: state.run_id().to_string(),
        });

        let mut completed: Vec<StageId> = Vec::new();
        let mut next = Some(entry);

        while let Some(stage_id) = next {
            if cancel.is_cancelled() {
                state.seal(RunPhase::Cancelled, start.elapsed())?;
                tracing::warn!(ticket = %ticket_id, completed = completed.len(), "Run cancelled");
                self.emitter.emit(PipelineEvent::RunCancelled {
                    ticket_id: ticket_id.clone(),
                    completed_stages: completed.clone(),
                });
                return Err(TriageError::Cancelled {
                    ticket_id,
                    completed: completed.len(),
                });
            }

            let stage = self.graph.stage(stage_id).ok_or_else(|| {
                TriageError::GraphInvalid(format!("stage '{stage_id}' is not in the pipeline"))
            })?;

            state.advance(RunPhase::Running(stage_id))?;
            self.emitter.emit(PipelineEvent::StageStarted {
                ticket_id: ticket_id.clone(),
                stage: stage_id,
            });

            let request = match stage.request(&state) {
                Ok(request) => request,
                Err(error) => {
                    let record = StageRecord {
                        stage: stage_id,
                        attempts: 0,
                        status: StageStatus::Failure,
                        elapsed: Duration::ZERO,
                        detail: Some(error.to_string()),
                    };
                    return self.abort(state, stage_id, error, record, start);
                }
            };

            let generator = self.generator.as_ref();
            let request = &request;
            let view = &state;
            let result = self
                .executor(stage_id)
                .execute(
                    &ticket_id,
                    stage_id,
                    stage.schema(),
                    move || generator.generate(request),
                    |record, provenance| stage.accept(record, view, provenance),
                    stage.fallback(),
                )
                .await;

            match result {
                Ok(outcome) => {
                    state.record_outcome(outcome.record(stage_id))?;
                    outcome.value.apply(&mut state)?;
                    state.advance(RunPhase::Done(stage_id))?;
                    completed.push(stage_id);
                }
                Err(failure) => {
                    let record = failure.record(stage_id);
                    return self.abort(state, stage_id, failure.error, record, start);
                }
            }

            let resolve = |key: &str| resolve_state_key(&state, key);
            next = match select_edge(&self.graph, stage_id, &resolve) {
                Some(edge) => {
                    tracing::debug!(ticket = %ticket_id, from = %stage_id, to = %edge.to, "Edge selected");
                    match edge.to {
                        EdgeTarget::Stage(id) => Some(id),
                        EdgeTarget::Exit => None,
                    }
                }
                None => None,
            };
        }

        for id in self.graph.stage_ids() {
            if !completed.contains(&id) {
                tracing::debug!(ticket = %ticket_id, stage = %id, "Stage skipped");
                self.emitter.emit(PipelineEvent::StageSkipped {
                    ticket_id: ticket_id.clone(),
                    stage: id,
                });
            }
        }

        let elapsed = start.elapsed();
        state.seal(RunPhase::Completed, elapsed)?;
        tracing::info!(
            ticket = %ticket_id,
            stages = completed.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Run completed"
        );
        self.emitter.emit(PipelineEvent::RunCompleted {
            ticket_id,
            completed_stages: completed,
            duration_ms: elapsed.as_millis() as u64,
        });
        Ok(state)
    }

    fn abort(
        &self,
        mut state: TicketState,
        stage: StageId,
        error: TriageError,
        record: StageRecord,
        start: Instant,
    ) -> Result<TicketState> {
        let ticket_id = state.ticket().id.clone();
        state.record_outcome(record)?;
        state.seal(RunPhase::Aborted, start.elapsed())?;

        tracing::error!(ticket = %ticket_id, stage = %stage, error = %error, "Run aborted");
        self.emitter.emit(PipelineEvent::RunAborted {
            ticket_id: ticket_id.clone(),
            stage,
            error: error.to_string(),
        });
        Err(TriageError::Aborted {
            ticket_id,
            stage,
            reason: error.to_string(),
            outcomes: state.outcomes().to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
