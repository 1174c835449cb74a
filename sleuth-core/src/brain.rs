//! Brain module: language model abstraction.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions and the
//! `Brain`, which pairs a reasoning and a fast provider and turns their
//! replies into typed, structured output for the research stages.

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::providers::OpenAiCompatibleProvider;
use crate::types::{
    CompletionRequest, CompletionResponse, Message, ModelVariant, ResponseFormat, TokenUsage,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Trait for language model providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Whether this provider honours [`ResponseFormat::JsonObject`].
    fn supports_structured_output(&self) -> bool {
        false
    }
}

/// The Brain wraps the two model variants and adds prompt assembly, transient
/// retries and structured-output parsing.
///
/// A single `Brain` is shared (behind an `Arc`) by every research task; it
/// holds no per-task state.
pub struct Brain {
    reasoning: Arc<dyn LlmProvider>,
    fast: Arc<dyn LlmProvider>,
    temperature: f32,
    max_tokens: Option<usize>,
    max_retries: usize,
}

impl Brain {
    pub fn new(reasoning: Arc<dyn LlmProvider>, fast: Arc<dyn LlmProvider>) -> Self {
        Self {
            reasoning,
            fast,
            temperature: 0.0,
            max_tokens: None,
            max_retries: 2,
        }
    }

    /// Use one provider for both variants.
    pub fn single(provider: Arc<dyn LlmProvider>) -> Self {
        Self::new(Arc::clone(&provider), provider)
    }

    /// Build a brain backed by OpenAI-compatible endpoints for both variants.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let reasoning = OpenAiCompatibleProvider::new(config, &config.reasoning_model)?;
        let fast = OpenAiCompatibleProvider::new(config, &config.fast_model)?;
        Ok(Self::new(Arc::new(reasoning), Arc::new(fast)).with_settings(config))
    }

    /// Apply sampling and retry settings from configuration.
    pub fn with_settings(mut self, config: &LlmConfig) -> Self {
        self.temperature = config.temperature;
        self.max_tokens = config.max_tokens;
        self.max_retries = config.max_retries;
        self
    }

    /// Get the provider behind a variant.
    pub fn provider(&self, variant: ModelVariant) -> &dyn LlmProvider {
        match variant {
            ModelVariant::Reasoning => &*self.reasoning,
            ModelVariant::Fast => &*self.fast,
        }
    }

    /// Get the model name behind a variant.
    pub fn model_name(&self, variant: ModelVariant) -> &str {
        self.provider(variant).model_name()
    }

    /// Ask the model for free text.
    pub async fn invoke_text(
        &self,
        variant: ModelVariant,
        system: &str,
        user: &str,
    ) -> Result<String, LlmError> {
        let response = self
            .complete(variant, system, user, ResponseFormat::Text)
            .await?;
        Ok(response.message.content)
    }

    /// Ask the model for a JSON object and deserialize it into `T`.
    ///
    /// Fenced replies (```json ... ```) and prose around the object are
    /// tolerated; anything else that fails to parse is a `ResponseParse` error.
    pub async fn invoke_structured<T: DeserializeOwned>(
        &self,
        variant: ModelVariant,
        system: &str,
        user: &str,
    ) -> Result<T, LlmError> {
        let response = self
            .complete(variant, system, user, ResponseFormat::JsonObject)
            .await?;
        parse_structured(&response.message.content)
    }

    async fn complete(
        &self,
        variant: ModelVariant,
        system: &str,
        user: &str,
        response_format: ResponseFormat,
    ) -> Result<CompletionResponse, LlmError> {
        let provider = self.provider(variant);
        let request = CompletionRequest {
            messages: vec![Message::system(system), Message::user(user)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format,
            model: None,
        };

        debug!(
            model = provider.model_name(),
            %variant,
            prompt_chars = system.len() + user.len(),
            "Sending completion request"
        );

        let response = self.complete_with_retry(provider, request).await?;

        info!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Completion received"
        );
        Ok(response)
    }

    /// Send a request, retrying transient errors with exponential backoff
    /// (1s, 2s, 4s, ..., capped at 32s). Non-transient errors return immediately.
    async fn complete_with_retry(
        &self,
        provider: &dyn LlmProvider,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        let mut attempt = 0;
        loop {
            match provider.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if Self::is_retryable(&e) && attempt < self.max_retries => {
                    let backoff_secs = std::cmp::min(1u64 << attempt, 32);
                    let wait = match &e {
                        LlmError::RateLimited { retry_after_secs } => {
                            std::cmp::max(*retry_after_secs, backoff_secs)
                        }
                        _ => backoff_secs,
                    };
                    info!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        backoff_secs = wait,
                        error = %e,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Check if an LLM error is transient and should be retried.
    pub fn is_retryable(error: &LlmError) -> bool {
        matches!(
            error,
            LlmError::RateLimited { .. } | LlmError::Timeout { .. } | LlmError::Connection { .. }
        )
    }
}

/// Extract and deserialize the JSON object in a model reply.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    let trimmed = strip_code_fence(raw.trim());
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }

    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => {
            return Err(LlmError::ResponseParse {
                message: "reply contains no JSON object".to_string(),
            });
        }
    };

    serde_json::from_str(candidate).map_err(|e| LlmError::ResponseParse {
        message: format!("Invalid structured output: {}", e),
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// A mock LLM provider for testing and offline runs.
///
/// Replies are served from a FIFO queue; once the queue is drained the
/// fallback reply is returned. Every request is recorded for assertions.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    fallback: Mutex<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::new()),
            fallback: Mutex::new("I'm a mock LLM. No queued responses available.".to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        let provider = Self::new();
        provider.set_fallback(text);
        provider
    }

    /// Replace the reply used once the queue is empty.
    pub fn set_fallback(&self, text: &str) {
        *self.fallback.lock().unwrap() = text.to_string();
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue a plain text reply.
    pub fn queue_text(&self, text: &str) {
        self.queue_response(Self::text_response(text));
    }

    /// Queue a JSON reply.
    pub fn queue_json(&self, value: serde_json::Value) {
        self.queue_response(Self::text_response(&value.to_string()));
    }

    /// Queue a failure for the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of queued replies not yet consumed.
    pub fn pending(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(reply) => reply,
            None => Ok(Self::text_response(&self.fallback.lock().unwrap())),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_structured_output(&self) -> bool {
        true
    }
}
