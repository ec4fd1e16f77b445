use std::{env, sync::Arc, time::Duration};

use tracing::{debug, info, instrument, warn};

use crate::{
    backend::{
        BackendRequest, GeminiBackend, MockBackend, MockRequest, ModelBackend, DEFAULT_BASE_URL,
    },
    error::{PipelineError, Result},
    flows::Flow,
    models::GenerationOutcome,
    schema::{check_request, coerce_response, model_schema},
};

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const MODEL_ENV: &str = "GEMINI_MODEL";
pub const BASE_URL_ENV: &str = "GEMINI_BASE_URL";

/// Global configuration options for the client.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Model name (default: gemini-2.5-flash)
    pub model: String,
    pub base_url: String,
    /// Generation temperature (default: 0.1)
    pub temperature: f32,
    /// Per-request timeout (default: 60s)
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.1,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Builder for [`FlowClient`].
pub struct FlowClientBuilder {
    api_key: Option<String>,
    config: ClientConfig,
    backend: Option<Arc<dyn ModelBackend>>,
}

impl FlowClientBuilder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            config: ClientConfig::default(),
            backend: None,
        }
    }

    /// Read the API key, and optionally model and base URL, from the environment.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var(API_KEY_ENV)
            .map_err(|_| PipelineError::Config(format!("{API_KEY_ENV} is not set")))?;
        let mut builder = Self::new(api_key);
        if let Ok(model) = env::var(MODEL_ENV) {
            builder = builder.with_model(model);
        }
        if let Ok(base_url) = env::var(BASE_URL_ENV) {
            builder = builder.with_base_url(base_url);
        }
        Ok(builder)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Set the generation temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Apply a complete client configuration.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom backend instead of Gemini.
    pub fn with_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Provide a mock handler to intercept all requests.
    ///
    /// This is primarily intended for unit tests where network calls should be avoided.
    pub fn with_mock(
        self,
        handler: impl Fn(MockRequest) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.with_backend(Arc::new(MockBackend::new(handler)))
    }

    /// Build the client.
    pub fn build(self) -> Result<FlowClient> {
        let backend = match self.backend {
            Some(backend) => backend,
            None => {
                let api_key = self
                    .api_key
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| PipelineError::Config("API key is empty".to_string()))?;
                Arc::new(
                    GeminiBackend::new(api_key, self.config.model.clone())
                        .with_base_url(self.config.base_url.clone())
                        .with_timeout(self.config.request_timeout),
                ) as Arc<dyn ModelBackend>
            }
        };
        debug!(backend = backend.name(), model = %self.config.model, "Built flow client");

        Ok(FlowClient {
            backend,
            config: self.config,
        })
    }
}

impl Default for FlowClientBuilder {
    /// A builder with no API key; `build` fails unless a backend is supplied.
    fn default() -> Self {
        Self {
            api_key: None,
            config: ClientConfig::default(),
            backend: None,
        }
    }
}

/// Invokes flows against a model backend. Cheap to clone and safe to share.
#[derive(Clone)]
pub struct FlowClient {
    backend: Arc<dyn ModelBackend>,
    config: ClientConfig,
}

impl FlowClient {
    pub fn builder(api_key: impl Into<String>) -> FlowClientBuilder {
        FlowClientBuilder::new(api_key)
    }

    /// Validate the request, send it once and coerce the reply.
    ///
    /// Nothing is sent when the request fails validation. A reply that does not
    /// match `F::Output` is rejected and never returned partially.
    #[instrument(skip_all, fields(flow = F::NAME, backend = self.backend.name()))]
    pub async fn invoke<F: Flow>(&self, input: &F::Input) -> Result<GenerationOutcome<F::Output>> {
        check_request(F::NAME, input)?;
        let prompt = F::compile_prompt(input)?;
        let fingerprint = prompt.fingerprint();
        debug!(prompt_fingerprint = %fingerprint, media = prompt.media_count(), "Compiled prompt");

        let request = BackendRequest {
            flow: F::NAME,
            prompt,
            response_schema: model_schema::<F::Output>(),
            temperature: self.config.temperature,
        };
        let reply = match self.backend.generate(request).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, retryable = err.is_retryable(), "Backend call failed");
                return Err(err);
            }
        };

        let value = coerce_response::<F::Output>(F::NAME, &reply.text)?;
        info!(
            prompt_fingerprint = %fingerprint,
            total_tokens = reply.usage.and_then(|u| u.total_token_count),
            "Flow completed"
        );

        Ok(GenerationOutcome::new(
            value,
            reply.usage,
            reply.model_version,
            reply.response_id,
            fingerprint,
        ))
    }

    /// Same as [`invoke`](Self::invoke) but returns only the value.
    pub async fn run<F: Flow>(&self, input: &F::Input) -> Result<F::Output> {
        Ok(self.invoke::<F>(input).await?.value)
    }

    /// Get the current client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::{IdentifyFoodItemsFlow, IdentifyFoodItemsInput};

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.model, "gemini-2.5-flash");
        assert_eq!(config.temperature, 0.1);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn empty_api_key_is_a_config_error() {
        let err = FlowClientBuilder::new("  ").build().err().unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(FlowClientBuilder::default().build().is_err());
    }

    #[tokio::test]
    async fn mock_receives_schema_and_temperature() {
        let client = FlowClientBuilder::default()
            .with_temperature(0.4)
            .with_mock(|req| {
                assert_eq!(req.flow, "identifyFoodItems");
                assert_eq!(req.temperature, 0.4);
                assert_eq!(req.response_schema["type"], "object");
                assert!(req.response_schema.get("$schema").is_none());
                Ok(r#"{"foodItems": ["apple"]}"#.to_string())
            })
            .build()
            .unwrap();

        let outcome = client
            .invoke::<IdentifyFoodItemsFlow>(&IdentifyFoodItemsInput::new(
                "data:image/png;base64,aGVsbG8=",
            ))
            .await
            .unwrap();
        assert_eq!(outcome.value.food_items, vec!["apple"]);
        assert_eq!(outcome.prompt_fingerprint.len(), 64);
        assert!(outcome.usage.is_none());
    }

    #[tokio::test]
    async fn invalid_request_never_reaches_backend() {
        let backend = MockBackend::replying(r#"{"foodItems": []}"#);
        let client = FlowClientBuilder::default()
            .with_backend(Arc::new(backend.clone()))
            .build()
            .unwrap();

        let err = client
            .run::<IdentifyFoodItemsFlow>(&IdentifyFoodItemsInput::new("data:text"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequestShape { .. }));
        assert_eq!(backend.calls(), 0);
    }
}
