//! Text-generation boundary for the triage pipeline.
//!
//! Provides the `Generator` trait the pipeline calls once per stage attempt,
//! the `RawOutput` candidate type it returns, a deterministic keyword-driven
//! `RulesGenerator`, response templates, and (behind the `providers` feature)
//! an HTTP adapter for the Anthropic Messages API.

#[cfg(feature = "providers")]
mod anthropic;
mod generator;
mod rules;
pub mod templates;
mod types;

#[cfg(feature = "providers")]
pub use anthropic::AnthropicGenerator;
pub use generator::*;
pub use rules::RulesGenerator;
pub use types::*;
