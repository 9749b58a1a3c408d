use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use triage_types::{Result, TriageError};

use crate::{GenerationRequest, Generator, RawOutput};

const PROVIDER: &str = "anthropic";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const DEFAULT_MAX_TOKENS: u32 = 1024;

// ---------------------------------------------------------------------------
// AnthropicGenerator
// ---------------------------------------------------------------------------

/// Generator backed by the Anthropic Messages API.
#[derive(Debug)]
pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    request_timeout: Option<Duration>,
}

impl AnthropicGenerator {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout: None,
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// HTTP-level timeout. The pipeline also bounds each attempt on its own.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn from_env() -> Result<Self> {
        let key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| TriageError::AuthError {
            provider: PROVIDER.into(),
        })?;
        Ok(Self::new(key))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    fn build_request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "messages": [
                { "role": "user", "content": [{ "type": "text", "text": request.prompt }] }
            ],
        });
        if !request.system.is_empty() {
            body["system"] = json!(request.system);
        }
        body
    }

    fn map_transport_error(&self, e: reqwest::Error) -> TriageError {
        if e.is_timeout() {
            TriageError::RequestTimeout {
                provider: PROVIDER.into(),
                timeout_ms: self
                    .request_timeout
                    .map(|t| t.as_millis() as u64)
                    .unwrap_or(0),
            }
        } else {
            TriageError::Connection {
                provider: PROVIDER.into(),
                message: e.to_string(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Response translation
// ---------------------------------------------------------------------------

/// Concatenate the text blocks of a Messages API response.
fn parse_response(body: &serde_json::Value) -> Result<String> {
    let blocks = body["content"]
        .as_array()
        .ok_or_else(|| TriageError::ProviderError {
            provider: PROVIDER.into(),
            status: 200,
            message: "response has no content array".into(),
            retryable: true,
        })?;

    let text: String = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();

    Ok(text)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(status: reqwest::StatusCode, body: &str) -> TriageError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => {
            let retry_ms = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v["error"]["retry_after"].as_f64())
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(1000);
            TriageError::RateLimited {
                provider: PROVIDER.into(),
                retry_after_ms: retry_ms,
            }
        }
        401 | 403 => TriageError::AuthError {
            provider: PROVIDER.into(),
        },
        400 => TriageError::MalformedRequest {
            provider: PROVIDER.into(),
            message: extract_error_message(body),
        },
        500 | 502 | 503 | 529 => TriageError::ProviderError {
            provider: PROVIDER.into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: true,
        },
        _ => TriageError::ProviderError {
            provider: PROVIDER.into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: false,
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// Generator implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Generator for AnthropicGenerator {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<RawOutput> {
        let body = self.build_request_body(request);

        let mut builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body);
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = resp.status();
        let response_body = resp.text().await.map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            tracing::debug!(stage = %request.stage, status = status.as_u16(), "anthropic request failed");
            return Err(map_error(status, &response_body));
        }

        let json: serde_json::Value =
            serde_json::from_str(&response_body).map_err(|e| TriageError::ProviderError {
                provider: PROVIDER.into(),
                status: status.as_u16(),
                message: format!("Failed to parse response JSON: {e}"),
                retryable: true,
            })?;

        parse_response(&json).map(RawOutput::Text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use triage_types::StageId;

    #[test]
    fn request_body_carries_prompt_and_system() {
        let generator = AnthropicGenerator::new("test-key".into()).with_max_tokens(256);
        let req = GenerationRequest::new(StageId::Analysis, "Classify this", json!({}))
            .with_system("Reply with JSON only.");
        let body = generator.build_request_body(&req);

        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["system"], "Reply with JSON only.");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"][0]["text"], "Classify this");
    }

    #[test]
    fn request_max_tokens_overrides_default() {
        let generator = AnthropicGenerator::new("k".into());
        let req = GenerationRequest::new(StageId::Response, "p", json!({})).with_max_tokens(64);
        let body = generator.build_request_body(&req);
        assert_eq!(body["max_tokens"], 64);
        assert!(body.get("system").is_none());
    }

    #[test]
    fn parse_response_joins_text_blocks() {
        let body = json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "```json\n{\"category\":"},
                {"type": "text", "text": "\"billing\"}\n```"}
            ],
            "stop_reason": "end_turn"
        });
        let text = parse_response(&body).unwrap();
        assert_eq!(text, "```json\n{\"category\":\"billing\"}\n```");
    }

    #[test]
    fn parse_response_without_content_is_retryable() {
        let err = parse_response(&json!({"id": "msg_2"})).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn from_env_returns_auth_error_when_key_not_set() {
        std::env::remove_var("ANTHROPIC_API_KEY");
        let err = AnthropicGenerator::from_env().unwrap_err();
        assert!(matches!(err, TriageError::AuthError { provider } if provider == "anthropic"));
    }

    #[test]
    fn error_mapping_429_rate_limited() {
        let err = map_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "rate limited", "retry_after": 2.5}}"#,
        );
        assert!(matches!(err, TriageError::RateLimited { retry_after_ms: 2500, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn error_mapping_auth_statuses() {
        for status in [reqwest::StatusCode::UNAUTHORIZED, reqwest::StatusCode::FORBIDDEN] {
            let err = map_error(status, r#"{"error": {"message": "denied"}}"#);
            assert!(matches!(err, TriageError::AuthError { .. }));
            assert!(err.is_terminal());
        }
    }

    #[test]
    fn error_mapping_400_is_malformed_request() {
        let err = map_error(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error": {"message": "bad request"}}"#,
        );
        match &err {
            TriageError::MalformedRequest { message, .. } => assert_eq!(message, "bad request"),
            other => panic!("expected MalformedRequest, got {other:?}"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_mapping_overloaded_is_retryable() {
        for code in [500u16, 502, 503, 529] {
            let status = reqwest::StatusCode::from_u16(code).unwrap();
            let err = map_error(status, "upstream unavailable");
            match &err {
                TriageError::ProviderError {
                    retryable,
                    status,
                    message,
                    ..
                } => {
                    assert!(*retryable);
                    assert_eq!(*status, code);
                    assert_eq!(message, "upstream unavailable");
                }
                other => panic!("expected ProviderError, got {other:?}"),
            }
        }
    }

    #[test]
    fn error_mapping_unknown_status_not_retryable() {
        let err = map_error(reqwest::StatusCode::NOT_FOUND, "{}");
        assert!(!err.is_retryable());
    }
}
