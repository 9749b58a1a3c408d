//! Pipeline configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;
use triage_types::{Result, StageId, TriageError};

/// Retry budget, attempt timeout and fallback value for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Substitute output used when the stage cannot produce a validated
    /// value. Validated against the stage schema like generated output.
    /// `null` selects the built-in fallback for the stage.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub fallback: serde_json::Value,
}

impl StageConfig {
    pub fn analysis() -> Self {
        Self::with_fallback(default_fallback(StageId::Analysis))
    }

    pub fn response() -> Self {
        Self::with_fallback(default_fallback(StageId::Response))
    }

    fn with_fallback(fallback: serde_json::Value) -> Self {
        Self {
            max_retries: default_max_retries(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            fallback,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Built-in fallback value for a stage.
pub fn default_fallback(stage: StageId) -> serde_json::Value {
    match stage {
        StageId::Analysis => json!({
            "category": "other",
            "priority": "medium",
            "expertise": [],
            "confidence": 0.0
        }),
        StageId::Response => json!({
            "body": "Thank you for contacting support. Your ticket has been received and \
                     routed to a specialist, who will follow up with you shortly.",
            "next_action": "escalate",
            "template_id": null
        }),
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_attempt_timeout_ms() -> u64 {
    30_000
}

/// Exponential backoff between attempts. `base_ms = 0` disables the delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "StageConfig::analysis")]
    pub analysis: StageConfig,
    #[serde(default = "StageConfig::response")]
    pub response: StageConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Upper bound on tickets processed at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Let the response stage resolve urgent tickets without an explicit
    /// override flag in its output.
    #[serde(default)]
    pub allow_urgent_resolve: bool,
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis: StageConfig::analysis(),
            response: StageConfig::response(),
            backoff: BackoffConfig::default(),
            max_concurrency: default_max_concurrency(),
            allow_urgent_resolve: false,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text).map_err(|e| {
            TriageError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(TriageError::Config(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.max_concurrency > Semaphore::MAX_PERMITS {
            return Err(TriageError::Config(format!(
                "max_concurrency must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        for stage in StageId::ALL {
            let sc = self.stage(stage);
            if sc.attempt_timeout_ms == 0 {
                return Err(TriageError::Config(format!(
                    "{stage}.attempt_timeout_ms must be greater than zero"
                )));
            }
            if !(sc.fallback.is_null() || sc.fallback.is_object()) {
                return Err(TriageError::Config(format!(
                    "{stage}.fallback must be a JSON object"
                )));
            }
        }
        Ok(())
    }

    pub fn stage(&self, stage: StageId) -> &StageConfig {
        match stage {
            StageId::Analysis => &self.analysis,
            StageId::Response => &self.response,
        }
    }

    /// The configured fallback for `stage`, or the built-in one.
    pub fn fallback(&self, stage: StageId) -> serde_json::Value {
        match &self.stage(stage).fallback {
            serde_json::Value::Null => default_fallback(stage),
            value => value.clone(),
        }
    }

    pub fn stage_mut(&mut self, stage: StageId) -> &mut StageConfig {
        match stage {
            StageId::Analysis => &mut self.analysis,
            StageId::Response => &mut self.response,
        }
    }

    /// Apply the same retry budget to every stage.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        for stage in StageId::ALL {
            self.stage_mut(stage).max_retries = max_retries;
        }
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }
}
