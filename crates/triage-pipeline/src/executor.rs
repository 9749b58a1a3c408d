//! Stage execution: generate, validate, accept, retry, fall back.

use std::future::Future;
use std::time::{Duration, Instant};

use triage_llm::RawOutput;
use triage_types::{
    Result, StageId, StageRecord, StageStatus, TriageError, ValidationFailure,
};

use crate::config::StageConfig;
use crate::events::{EventEmitter, PipelineEvent};
use crate::retry::{execute_with_retry, BackoffPolicy};
use crate::schema::{Schema, ValidatedRecord};
use crate::validator::validate;

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Where an accepted value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Generated,
    Fallback,
}

/// A value produced by one stage invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome<T> {
    pub value: T,
    pub status: StageStatus,
    /// Generation attempts actually made.
    pub attempts: u32,
    pub elapsed: Duration,
    /// Last attempt error when the value is a fallback.
    pub last_error: Option<String>,
}

impl<T> StageOutcome<T> {
    pub fn record(&self, stage: StageId) -> StageRecord {
        StageRecord {
            stage,
            attempts: self.attempts,
            status: self.status,
            elapsed: self.elapsed,
            detail: self.last_error.clone(),
        }
    }
}

/// A stage invocation that produced no value. Ends the run.
#[derive(Debug)]
pub struct StageFailure {
    pub error: TriageError,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl StageFailure {
    pub fn record(&self, stage: StageId) -> StageRecord {
        StageRecord {
            stage,
            attempts: self.attempts,
            status: StageStatus::Failure,
            elapsed: self.elapsed,
            detail: Some(self.error.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// StageExecutor
// ---------------------------------------------------------------------------

/// Runs one stage with a retry budget, a per-attempt timeout and a fallback.
#[derive(Debug, Clone)]
pub struct StageExecutor {
    max_retries: u32,
    attempt_timeout: Duration,
    backoff: BackoffPolicy,
    emitter: Option<EventEmitter>,
}

impl StageExecutor {
    pub fn new(max_retries: u32, attempt_timeout: Duration, backoff: BackoffPolicy) -> Self {
        Self {
            max_retries,
            attempt_timeout,
            backoff,
            emitter: None,
        }
    }

    pub fn from_config(config: &StageConfig, backoff: BackoffPolicy) -> Self {
        Self::new(config.max_retries, config.attempt_timeout(), backoff)
    }

    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(emitter) = &self.emitter {
            emitter.emit(event);
        }
    }

    /// Execute one stage.
    ///
    /// Each attempt calls `generate`, bounded by the attempt timeout, and pipes
    /// the candidate through [`validate`] and then `accept`. Transient call
    /// failures, validation failures and policy rejections are retried; other
    /// call failures go straight to the fallback, except run-ending errors
    /// ([`TriageError::is_fatal`]), which fail the stage. The fallback is
    /// validated and accepted the same way, and a rejected fallback is a
    /// [`TriageError::FallbackMalformed`] failure.
    pub async fn execute<T, G, Fut, A>(
        &self,
        ticket_id: &str,
        stage: StageId,
        schema: &Schema,
        generate: G,
        accept: A,
        fallback: &RawOutput,
    ) -> std::result::Result<StageOutcome<T>, StageFailure>
    where
        G: Fn() -> Fut,
        Fut: Future<Output = Result<RawOutput>>,
        A: Fn(ValidatedRecord, Provenance) -> std::result::Result<T, ValidationFailure>,
    {
        let start = Instant::now();
        let timeout = self.attempt_timeout;

        let report = execute_with_retry(
            |_| {
                let accept = &accept;
                let call = generate();
                async move {
                    let raw = match tokio::time::timeout(timeout, call).await {
                        Ok(result) => result?,
                        Err(_) => {
                            return Err(TriageError::RequestTimeout {
                                provider: stage.to_string(),
                                timeout_ms: timeout.as_millis() as u64,
                            })
                        }
                    };
                    let record = validate(&raw, schema)?;
                    Ok(accept(record, Provenance::Generated)?)
                }
            },
            self.max_retries,
            &self.backoff,
            stage.as_str(),
            |attempt, error| {
                if let TriageError::Validation(failure) = error {
                    tracing::debug!(ticket = %ticket_id, stage = %stage, attempt, raw = %failure.raw, "Rejected stage output");
                }
                self.emit(PipelineEvent::AttemptFailed {
                    ticket_id: ticket_id.to_string(),
                    stage,
                    attempt,
                    error: error.to_string(),
                    retryable: error.is_retryable(),
                });
            },
        )
        .await;

        let attempts = report.attempts;
        let (value, status, last_error) = match report.result {
            Ok(value) => (value, StageStatus::Success, None),
            Err(error) if error.is_fatal() => {
                tracing::error!(ticket = %ticket_id, stage = %stage, attempts, error = %error, "Stage failed");
                return Err(self.fail(ticket_id, stage, error, attempts, start));
            }
            Err(error) => {
                if error.is_terminal() {
                    tracing::warn!(ticket = %ticket_id, stage = %stage, attempts, error = %error, "Stage failed permanently, falling back");
                } else {
                    tracing::warn!(ticket = %ticket_id, stage = %stage, attempts, error = %error, "Stage retries exhausted, falling back");
                }
                let fallback_value = validate(fallback, schema)
                    .and_then(|record| accept(record, Provenance::Fallback));
                match fallback_value {
                    Ok(value) => (value, StageStatus::Fallback, Some(error.to_string())),
                    Err(failure) => {
                        tracing::error!(ticket = %ticket_id, stage = %stage, failure = %failure, "Fallback value is malformed");
                        let error = TriageError::FallbackMalformed { stage, failure };
                        return Err(self.fail(ticket_id, stage, error, attempts, start));
                    }
                }
            }
        };

        let elapsed = start.elapsed();
        tracing::info!(
            ticket = %ticket_id,
            stage = %stage,
            status = %status,
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "Stage completed"
        );
        self.emit(PipelineEvent::StageCompleted {
            ticket_id: ticket_id.to_string(),
            stage,
            status,
            attempts,
            duration_ms: elapsed.as_millis() as u64,
        });

        Ok(StageOutcome {
            value,
            status,
            attempts,
            elapsed,
            last_error,
        })
    }

    fn fail(
        &self,
        ticket_id: &str,
        stage: StageId,
        error: TriageError,
        attempts: u32,
        start: Instant,
    ) -> StageFailure {
        let elapsed = start.elapsed();
        self.emit(PipelineEvent::StageCompleted {
            ticket_id: ticket_id.to_string(),
            stage,
            status: StageStatus::Failure,
            attempts,
            duration_ms: elapsed.as_millis() as u64,
        });
        StageFailure {
            error,
            attempts,
            elapsed,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
