//! Shared types, errors, and run state for the ticket triage pipeline.
//!
//! This crate provides the foundational types used across all other triage crates:
//! - `TriageError`: unified error taxonomy
//! - `Ticket`, `AnalysisResult`, `ResponseResult`: the ticket data model
//! - `TicketState`: the per-run accumulator threaded through the pipeline
//! - `ValidationFailure`: typed diagnostics for rejected stage output

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod state;
mod ticket;

pub use state::{RunPhase, StageRecord, TicketState};
pub use ticket::{
    AnalysisResult, Category, CustomerInfo, NextAction, Priority, ResponseInput, ResponseResult,
    Ticket,
};

/// Unified error type for all triage subsystems.
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    // === Generation call errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    #[error("Connection to {provider} failed: {message}")]
    Connection { provider: String, message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Malformed request to {provider}: {message}")]
    MalformedRequest { provider: String, message: String },

    // === Stage output errors ===
    #[error("Stage output rejected: {0}")]
    Validation(ValidationFailure),

    #[error("Fallback for stage '{stage}' is malformed: {failure}")]
    FallbackMalformed {
        stage: StageId,
        failure: ValidationFailure,
    },

    // === Run lifecycle errors ===
    #[error("Ticket '{ticket_id}' rejected: {reason}")]
    InputInvalid { ticket_id: String, reason: String },

    #[error("Stage '{stage}' requires the {missing} result, which is not present")]
    MissingDependency { stage: StageId, missing: StageId },

    #[error("Run for ticket '{ticket_id}' aborted in stage '{stage}': {reason}")]
    Aborted {
        ticket_id: String,
        stage: StageId,
        reason: String,
        outcomes: Vec<StageRecord>,
    },

    #[error("Run for ticket '{ticket_id}' cancelled after {completed} completed stage(s)")]
    Cancelled { ticket_id: String, completed: usize },

    #[error("Ticket state for '{ticket_id}' is sealed in phase {phase}")]
    StateSealed { ticket_id: String, phase: RunPhase },

    #[error("Pipeline graph invalid: {0}")]
    GraphInvalid(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TriageError {
    /// Returns `true` if the error is transient and another attempt may succeed.
    ///
    /// Rejected output counts as transient: a fresh generation gets another
    /// chance at a well-formed answer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TriageError::RateLimited { .. }
                | TriageError::RequestTimeout { .. }
                | TriageError::Connection { .. }
                | TriageError::ProviderError { retryable: true, .. }
                | TriageError::Validation(_)
        )
    }

    /// Returns `true` if the call failure is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TriageError::AuthError { .. }
                | TriageError::MalformedRequest { .. }
                | TriageError::ProviderError {
                    retryable: false,
                    ..
                }
        )
    }

    /// Returns `true` if the error ends a ticket run rather than a single attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TriageError::FallbackMalformed { .. }
                | TriageError::MissingDependency { .. }
                | TriageError::Aborted { .. }
                | TriageError::Cancelled { .. }
                | TriageError::InputInvalid { .. }
                | TriageError::StateSealed { .. }
                | TriageError::GraphInvalid(_)
        )
    }
}

/// A convenience alias for `Result<T, TriageError>`.
pub type Result<T> = std::result::Result<T, TriageError>;

// ---------------------------------------------------------------------------
// StageId: the stages a pipeline can be built from
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Analysis,
    Response,
}

impl StageId {
    pub const ALL: [StageId; 2] = [StageId::Analysis, StageId::Response];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Analysis => "analysis",
            StageId::Response => "response",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "analysis" => Ok(StageId::Analysis),
            "response" => Ok(StageId::Response),
            other => Err(TriageError::Other(format!("unknown stage '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// StageStatus: how a stage produced (or failed to produce) its value
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Fallback,
    Failure,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageStatus::Success => "success",
            StageStatus::Fallback => "fallback",
            StageStatus::Failure => "failure",
        })
    }
}

// ---------------------------------------------------------------------------
// ValidationFailure: why a candidate output was rejected
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationKind {
    SchemaMismatch,
    MissingField,
    OutOfRange,
    Unparsable,
    /// Structurally valid output that the stage's own policy refuses.
    PolicyViolation,
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValidationKind::SchemaMismatch => "schema-mismatch",
            ValidationKind::MissingField => "missing-field",
            ValidationKind::OutOfRange => "out-of-range",
            ValidationKind::Unparsable => "unparsable",
            ValidationKind::PolicyViolation => "policy-violation",
        })
    }
}

/// Diagnostic for a rejected candidate. Carries the offending payload for
/// logging; never shown to the ticket submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub kind: ValidationKind,
    pub field: Option<String>,
    pub message: String,
    pub raw: String,
}

impl ValidationFailure {
    pub fn new(
        kind: ValidationKind,
        field: Option<&str>,
        message: impl Into<String>,
        raw: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            field: field.map(String::from),
            message: message.into(),
            raw: raw.into(),
        }
    }

    pub fn missing_field(field: &str, raw: impl Into<String>) -> Self {
        Self::new(
            ValidationKind::MissingField,
            Some(field),
            format!("required field '{field}' is absent"),
            raw,
        )
    }

    pub fn policy(field: &str, message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::new(ValidationKind::PolicyViolation, Some(field), message, raw)
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{} on '{}': {}", self.kind, field, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl From<ValidationFailure> for TriageError {
    fn from(failure: ValidationFailure) -> Self {
        TriageError::Validation(failure)
    }
}

/// Serde helper storing a `Duration` as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_rate_limited() {
        let err = TriageError::RateLimited {
            provider: "anthropic".into(),
            retry_after_ms: 3000,
        };
        assert_eq!(
            err.to_string(),
            "Rate limited by anthropic, retry after 3000ms"
        );
    }

    #[test]
    fn error_display_input_invalid() {
        let err = TriageError::InputInvalid {
            ticket_id: "TKT-9".into(),
            reason: "body is empty".into(),
        };
        assert_eq!(err.to_string(), "Ticket 'TKT-9' rejected: body is empty");
    }

    #[test]
    fn error_display_fallback_malformed() {
        let err = TriageError::FallbackMalformed {
            stage: StageId::Analysis,
            failure: ValidationFailure::missing_field("category", "{}"),
        };
        assert_eq!(
            err.to_string(),
            "Fallback for stage 'analysis' is malformed: missing-field on 'category': required field 'category' is absent"
        );
    }

    #[test]
    fn error_display_missing_dependency() {
        let err = TriageError::MissingDependency {
            stage: StageId::Response,
            missing: StageId::Analysis,
        };
        assert_eq!(
            err.to_string(),
            "Stage 'response' requires the analysis result, which is not present"
        );
    }

    // --- is_retryable ---

    #[test]
    fn retryable_transient_call_failures() {
        let errs = [
            TriageError::RateLimited {
                provider: "x".into(),
                retry_after_ms: 0,
            },
            TriageError::RequestTimeout {
                provider: "x".into(),
                timeout_ms: 10,
            },
            TriageError::Connection {
                provider: "x".into(),
                message: "reset".into(),
            },
            TriageError::ProviderError {
                provider: "x".into(),
                status: 503,
                message: "unavailable".into(),
                retryable: true,
            },
        ];
        for err in &errs {
            assert!(err.is_retryable(), "{err} should be retryable");
            assert!(!err.is_terminal(), "{err} should not be terminal");
        }
    }

    #[test]
    fn retryable_validation_failure() {
        let err: TriageError = ValidationFailure::missing_field("priority", "{}").into();
        assert!(err.is_retryable());
    }

    #[test]
    fn terminal_call_failures() {
        let errs = [
            TriageError::AuthError {
                provider: "x".into(),
            },
            TriageError::MalformedRequest {
                provider: "x".into(),
                message: "bad".into(),
            },
            TriageError::ProviderError {
                provider: "x".into(),
                status: 400,
                message: "bad request".into(),
                retryable: false,
            },
        ];
        for err in &errs {
            assert!(err.is_terminal(), "{err} should be terminal");
            assert!(!err.is_retryable(), "{err} should not be retryable");
        }
    }

    #[test]
    fn fatal_run_errors() {
        assert!(TriageError::Cancelled {
            ticket_id: "t".into(),
            completed: 1
        }
        .is_fatal());
        assert!(TriageError::GraphInvalid("cycle".into()).is_fatal());
        assert!(!TriageError::AuthError {
            provider: "x".into()
        }
        .is_fatal());
    }

    // --- StageId ---

    #[test]
    fn stage_id_parses_case_insensitively() {
        assert_eq!("Analysis".parse::<StageId>().unwrap(), StageId::Analysis);
        assert_eq!(" response ".parse::<StageId>().unwrap(), StageId::Response);
        assert!("triage".parse::<StageId>().is_err());
    }

    #[test]
    fn stage_status_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&StageStatus::Fallback).unwrap(),
            "\"fallback\""
        );
        let status: StageStatus = serde_json::from_str("\"failure\"").unwrap();
        assert_eq!(status, StageStatus::Failure);
    }

    #[test]
    fn validation_kind_serializes_to_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ValidationKind::SchemaMismatch).unwrap(),
            "\"schema-mismatch\""
        );
        assert_eq!(ValidationKind::OutOfRange.to_string(), "out-of-range");
    }

    #[test]
    fn validation_failure_display_without_field() {
        let failure = ValidationFailure::new(
            ValidationKind::Unparsable,
            None,
            "expected a JSON object",
            "hello",
        );
        assert_eq!(failure.to_string(), "unparsable: expected a JSON object");
    }
}
