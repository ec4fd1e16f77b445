//! Model backends.
//!
//! [`ModelBackend`] is the seam between the flow client and whatever produces
//! text: the Gemini REST API in production, a closure in tests.

use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::{
    error::{FieldIssue, PipelineError, Result},
    prompt::{CompiledPrompt, PromptPart},
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_token_count: Option<u32>,
    pub candidates_token_count: Option<u32>,
    pub total_token_count: Option<u32>,
}

/// One generation call: a compiled prompt plus the reply contract.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub flow: &'static str,
    pub prompt: CompiledPrompt,
    /// JSON Schema the reply must satisfy, already cleaned for the backend.
    pub response_schema: Value,
    pub temperature: f32,
}

/// Raw text and metadata returned by a backend.
#[derive(Debug, Clone, Default)]
pub struct BackendReply {
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub model_version: Option<String>,
    pub response_id: Option<String>,
}

impl BackendReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Produces raw model text for a compiled prompt.
///
/// Implementations make exactly one attempt per call; retrying is left to the caller.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(&self, request: BackendRequest) -> Result<BackendReply>;

    /// Short label used in logs.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Gemini `generateContent` over HTTPS.
#[derive(Clone)]
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Point the backend at another host, e.g. a local mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn translate_request(request: &BackendRequest) -> GeminiRequest {
        let parts = request
            .prompt
            .parts()
            .iter()
            .map(|part| match part {
                PromptPart::Text(text) => GeminiPart::text(text.clone()),
                PromptPart::InlineMedia { mime_type, data } => GeminiPart {
                    inline_data: Some(GeminiInlineData {
                        mime_type: mime_type.clone(),
                        data: data.clone(),
                    }),
                    ..Default::default()
                },
            })
            .collect();

        GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts,
            }],
            system_instruction: request
                .prompt
                .system_instruction()
                .map(|text| GeminiContent {
                    role: None,
                    parts: vec![GeminiPart::text(text.to_string())],
                }),
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                response_mime_type: "application/json".to_string(),
                response_json_schema: request.response_schema.clone(),
            },
        }
    }

    fn translate_response(flow: &'static str, body: &str) -> Result<BackendReply> {
        let envelope: GeminiResponse = serde_json::from_str(body).map_err(|e| {
            PipelineError::InvalidResponseShape {
                flow,
                issues: vec![FieldIssue::root(format!(
                    "backend envelope is not a generateContent response: {e}"
                ))],
            }
        })?;

        let Some(candidate) = envelope.candidates.into_iter().next() else {
            let reason = envelope
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .map(|r| format!("backend returned no candidates (blocked: {r})"))
                .unwrap_or_else(|| "backend returned no candidates".to_string());
            return Err(PipelineError::InvalidResponseShape {
                flow,
                issues: vec![FieldIssue::root(reason)],
            });
        };

        let text = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter(|p| !p.thought.unwrap_or(false))
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        if let Some(reason) = candidate.finish_reason.as_deref() {
            if reason != "STOP" {
                warn!(flow, finish_reason = reason, "Candidate finished early");
            }
        }

        Ok(BackendReply {
            text,
            usage: envelope.usage_metadata,
            model_version: envelope.model_version,
            response_id: envelope.response_id,
        })
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    #[instrument(skip_all, fields(flow = request.flow, model = %self.model))]
    async fn generate(&self, request: BackendRequest) -> Result<BackendReply> {
        let body = Self::translate_request(&request);
        debug!(
            parts = body.contents[0].parts.len(),
            media = request.prompt.media_count(),
            "Sending generateContent request"
        );

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::transport(format!(
                        "request timed out after {}ms",
                        self.timeout.as_millis()
                    ))
                } else {
                    PipelineError::transport(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PipelineError::transport(format!("failed to read response body: {e}")))?;
        let latency_ms = start.elapsed().as_millis();

        if !status.is_success() {
            warn!(status = status.as_u16(), latency_ms, "Backend returned an error status");
            return Err(PipelineError::backend_status(status.as_u16(), &text));
        }

        debug!(latency_ms, "Backend replied");
        Self::translate_response(request.flow, &text)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

impl GeminiPart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    response_mime_type: String,
    response_json_schema: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<TokenUsage>,
    model_version: Option<String>,
    response_id: Option<String>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

/// Handler used to short-circuit requests during tests.
///
/// The handler receives a lightweight view of the request and returns the raw
/// text the model would have produced.
pub type MockHandler = Arc<dyn Fn(MockRequest) -> Result<String> + Send + Sync>;

/// Minimal view of a backend request passed to [`MockHandler`].
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub flow: &'static str,
    pub system_instruction: Option<String>,
    /// Text parts of the prompt joined by blank lines.
    pub prompt_text: String,
    pub media_count: usize,
    pub response_schema: Value,
    pub temperature: f32,
}

/// Backend that answers from a closure and counts its calls.
#[derive(Clone)]
pub struct MockBackend {
    handler: MockHandler,
    calls: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new(handler: impl Fn(MockRequest) -> Result<String> + Send + Sync + 'static) -> Self {
        Self::from_handler(Arc::new(handler))
    }

    pub fn from_handler(handler: MockHandler) -> Self {
        Self {
            handler,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always reply with the same text.
    pub fn replying(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Number of `generate` calls so far, shared between clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBackend")
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn generate(&self, request: BackendRequest) -> Result<BackendReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mock_request = MockRequest {
            flow: request.flow,
            system_instruction: request.prompt.system_instruction().map(str::to_string),
            prompt_text: request.prompt.text(),
            media_count: request.prompt.media_count(),
            response_schema: request.response_schema,
            temperature: request.temperature,
        };
        let text = (self.handler)(mock_request)?;
        Ok(BackendReply::text(text))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptBuilder;
    use serde_json::json;

    fn request() -> BackendRequest {
        BackendRequest {
            flow: "identifyFoodItems",
            prompt: PromptBuilder::new()
                .with_system("You are a food recognition expert.")
                .add_text("Image:")
                .add_inline_media("image/png", "aGVsbG8=")
                .build(),
            response_schema: json!({"type": "object"}),
            temperature: 0.1,
        }
    }

    #[test]
    fn request_body_uses_gemini_field_names() {
        let body = serde_json::to_value(GeminiBackend::translate_request(&request())).unwrap();
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "You are a food recognition expert."
        );
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Image:");
        assert_eq!(
            body["contents"][0]["parts"][1]["inlineData"],
            json!({"mimeType": "image/png", "data": "aGVsbG8="})
        );
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(
            body["generationConfig"]["responseJsonSchema"],
            json!({"type": "object"})
        );
    }

    #[test]
    fn response_text_skips_thought_parts() {
        let body = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "{\"foodItems\":"},
                    {"text": "[\"apple\"]}"}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "totalTokenCount": 20},
            "modelVersion": "gemini-2.5-flash",
            "responseId": "abc"
        });
        let reply =
            GeminiBackend::translate_response("identifyFoodItems", &body.to_string()).unwrap();
        assert_eq!(reply.text, "{\"foodItems\":[\"apple\"]}");
        assert_eq!(reply.usage.and_then(|u| u.prompt_token_count), Some(12));
        assert_eq!(reply.model_version.as_deref(), Some("gemini-2.5-flash"));
        assert_eq!(reply.response_id.as_deref(), Some("abc"));
    }

    #[test]
    fn malformed_envelope_is_a_shape_error() {
        let err = GeminiBackend::translate_response("identifyFoodItems", "<html>oops</html>")
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidResponseShape { .. }));

        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}}).to_string();
        let err = GeminiBackend::translate_response("identifyFoodItems", &blocked).unwrap_err();
        assert!(err.field_issues()[0].reason.contains("SAFETY"));
    }

    #[tokio::test]
    async fn mock_backend_counts_calls() {
        let backend = MockBackend::new(|req| {
            assert_eq!(req.flow, "identifyFoodItems");
            assert_eq!(req.media_count, 1);
            assert_eq!(req.prompt_text, "Image:");
            Ok(r#"{"foodItems": []}"#.to_string())
        });
        let shared: Arc<dyn ModelBackend> = Arc::new(backend.clone());

        let reply = shared.generate(request()).await.unwrap();
        assert_eq!(reply.text, r#"{"foodItems": []}"#);
        shared.generate(request()).await.unwrap();
        assert_eq!(backend.calls(), 2);
        assert_eq!(shared.name(), "mock");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let backend = GeminiBackend::new("secret-api-key", "gemini-2.5-flash")
            .with_base_url("http://localhost:8080/");
        assert_eq!(
            backend.endpoint(),
            "http://localhost:8080/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert!(!format!("{backend:?}").contains("secret"));
    }
}
