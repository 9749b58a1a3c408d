//! Front door of the pipeline.
//!
//! The [`Orchestrator`] admits tickets (input checks plus the in-flight
//! working set), bounds concurrent runs with a semaphore, and hands each
//! admitted ticket to the [`PipelineEngine`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, Semaphore};
use triage_llm::Generator;
use triage_types::{Result, Ticket, TicketState, TriageError};

use crate::config::PipelineConfig;
use crate::engine::{CancelToken, PipelineEngine};
use crate::events::{EventEmitter, PipelineEvent};
use crate::graph::PipelineGraph;

type WorkingSet = Arc<Mutex<HashSet<String>>>;

fn lock(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a ticket id from the working set when its run ends.
struct Admission {
    in_flight: WorkingSet,
    ticket_id: String,
}

impl Drop for Admission {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.ticket_id);
    }
}

/// Cheap to clone; clones share the engine, permits and working set.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<PipelineConfig>,
    engine: Arc<PipelineEngine>,
    permits: Arc<Semaphore>,
    in_flight: WorkingSet,
}

impl Orchestrator {
    /// Build an orchestrator over the standard `analysis -> response` graph.
    pub fn new(config: PipelineConfig, generator: Arc<dyn Generator>) -> Result<Self> {
        config.validate()?;
        let graph = PipelineGraph::standard(&config)?;
        Self::with_graph(config, graph, generator)
    }

    /// Build an orchestrator over a custom graph.
    pub fn with_graph(
        config: PipelineConfig,
        graph: PipelineGraph,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        config.validate()?;
        let emitter = EventEmitter::default();
        let engine = PipelineEngine::new(Arc::new(graph), generator, &config, emitter);
        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
            config: Arc::new(config),
            engine: Arc::new(engine),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.engine.emitter().subscribe()
    }

    /// Number of tickets currently admitted.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Process one ticket to completion.
    pub async fn process(&self, ticket: Ticket) -> Result<TicketState> {
        self.process_with_cancel(ticket, &CancelToken::new()).await
    }

    /// Process one ticket, observing `cancel` between stages.
    ///
    /// Rejected tickets fail with [`TriageError::InputInvalid`] before any
    /// stage runs.
    pub async fn process_with_cancel(
        &self,
        ticket: Ticket,
        cancel: &CancelToken,
    ) -> Result<TicketState> {
        if let Err(err) = ticket.check() {
            tracing::warn!(ticket = %ticket.id, error = %err, "Ticket rejected");
            return Err(err);
        }
        let _admission = self.admit(&ticket.id)?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TriageError::Other("orchestrator permit pool is closed".into()))?;

        self.engine.run(TicketState::new(ticket), cancel).await
    }

    /// Process tickets concurrently, bounded by `max_concurrency`.
    ///
    /// Results come back in input order. A ticket whose id repeats an earlier
    /// one in the same batch is rejected.
    pub async fn process_batch(&self, tickets: Vec<Ticket>) -> Vec<Result<TicketState>> {
        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(tickets.len());

        for ticket in tickets {
            if !seen.insert(ticket.id.clone()) {
                tasks.push(Err(TriageError::InputInvalid {
                    reason: "duplicate ticket id in batch".into(),
                    ticket_id: ticket.id,
                }));
                continue;
            }
            let this = self.clone();
            tasks.push(Ok(tokio::spawn(async move { this.process(ticket).await })));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let result = match task {
                Ok(handle) => handle
                    .await
                    .unwrap_or_else(|e| Err(TriageError::Other(format!("ticket task failed: {e}")))),
                Err(err) => Err(err),
            };
            results.push(result);
        }
        results
    }

    fn admit(&self, ticket_id: &str) -> Result<Admission> {
        if !lock(&self.in_flight).insert(ticket_id.to_string()) {
            tracing::warn!(ticket = %ticket_id, "Ticket already in flight");
            return Err(TriageError::InputInvalid {
                ticket_id: ticket_id.to_string(),
                reason: "ticket is already being processed".into(),
            });
        }
        tracing::debug!(ticket = %ticket_id, "Ticket admitted");
        Ok(Admission {
            in_flight: Arc::clone(&self.in_flight),
            ticket_id: ticket_id.to_string(),
        })
    }
}
