//! Ticket triage engine.
//!
//! Validates generated stage output against a schema, retries and falls back
//! per stage, walks the stage graph for each ticket, and runs many tickets
//! concurrently behind the [`Orchestrator`].

pub mod condition;
pub mod config;
pub mod edge_selection;
pub mod engine;
pub mod events;
pub mod executor;
pub mod graph;
pub mod orchestrator;
pub mod retry;
pub mod schema;
pub mod stages;
pub mod validation;
pub mod validator;

pub use condition::{
    evaluate_condition, parse_condition, resolve_state_key, Clause, ConditionExpr, Operator,
};
pub use config::{default_fallback, BackoffConfig, PipelineConfig, StageConfig};
pub use edge_selection::select_edge;
pub use engine::{CancelToken, PipelineEngine};
pub use events::{EventEmitter, PipelineEvent};
pub use executor::{Provenance, StageExecutor, StageFailure, StageOutcome};
pub use graph::{EdgeTarget, PipelineEdge, PipelineGraph, PipelineGraphBuilder};
pub use orchestrator::Orchestrator;
pub use retry::{execute_with_retry, BackoffPolicy, RetryReport};
pub use schema::{FieldKind, FieldSpec, Schema, TypedValue, ValidatedRecord};
pub use stages::{analysis_schema, response_schema, AnalysisStage, ResponseStage, Stage, StageValue};
pub use validation::{validate as lint_graph, validate_or_raise, Diagnostic, LintRule, Severity};
pub use validator::validate;
