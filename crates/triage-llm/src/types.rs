use serde::{Deserialize, Serialize};
use triage_types::StageId;

// ---------------------------------------------------------------------------
// GenerationRequest
// ---------------------------------------------------------------------------

/// One generation call for one stage attempt.
///
/// `prompt` is the natural-language rendering for model backends; `payload`
/// carries the same stage input as structured JSON for backends that do not
/// need a prompt at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub stage: StageId,
    pub system: String,
    pub prompt: String,
    pub payload: serde_json::Value,
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(stage: StageId, prompt: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            stage,
            system: String::new(),
            prompt: prompt.into(),
            payload,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// ---------------------------------------------------------------------------
// RawOutput
// ---------------------------------------------------------------------------

/// Unvalidated candidate returned by a generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RawOutput {
    /// Free text, expected to contain a JSON object somewhere inside.
    Text(String),
    /// An already-structured candidate.
    Structured(serde_json::Value),
}

impl RawOutput {
    pub fn text(s: impl Into<String>) -> Self {
        RawOutput::Text(s.into())
    }

    /// The payload as a string, for diagnostics.
    pub fn to_raw_string(&self) -> String {
        match self {
            RawOutput::Text(s) => s.clone(),
            RawOutput::Structured(v) => v.to_string(),
        }
    }
}

impl From<serde_json::Value> for RawOutput {
    fn from(value: serde_json::Value) -> Self {
        RawOutput::Structured(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_builder_sets_fields() {
        let req = GenerationRequest::new(StageId::Analysis, "classify", json!({"id": 1}))
            .with_system("You are a triage assistant")
            .with_max_tokens(512);
        assert_eq!(req.stage, StageId::Analysis);
        assert_eq!(req.system, "You are a triage assistant");
        assert_eq!(req.max_tokens, Some(512));
        assert_eq!(req.payload["id"], 1);
    }

    #[test]
    fn raw_output_to_raw_string() {
        assert_eq!(RawOutput::text("hi").to_raw_string(), "hi");
        let structured: RawOutput = json!({"a": 1}).into();
        assert_eq!(structured.to_raw_string(), r#"{"a":1}"#);
    }

    #[test]
    fn raw_output_serializes_tagged() {
        let json = serde_json::to_value(RawOutput::text("x")).unwrap();
        assert_eq!(json, json!({"kind": "text", "value": "x"}));
    }
}
