//! LLM provider routing with retry and failover.
//!
//! Providers are external systems behind [`LlmProvider`]; the router is
//! the only component the dispatcher talks to.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{ServiceError, ServiceResult};

/// Roles supported in chat-style prompts.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System messages steer the assistant behaviour.
    System,
    /// User-authored content.
    User,
    /// Assistant (model) responses.
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        })
    }
}

/// A single message in a chat-style prompt.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Message role.
    pub role: ChatRole,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    /// Creates a user-authored message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
}

/// A completion request routed to a provider.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LlmRequest {
    /// Requested model name.
    pub model: String,
    /// Conversation messages, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Optional completion token ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Optional sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Token accounting returned by providers.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LlmUsage {
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens produced.
    pub output_tokens: u64,
}

impl LlmUsage {
    /// Total tokens across prompt and completion.
    #[must_use]
    pub const fn total(self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A completed routing result.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LlmResponse {
    /// Completion text.
    pub content: String,
    /// Model that served the request.
    pub model: String,
    /// Token accounting.
    pub usage: LlmUsage,
    /// Identifier of the provider that served the request.
    pub provider_id: String,
    /// End-to-end latency in milliseconds.
    pub latency_ms: u64,
}

/// A partial completion chunk pushed to streaming subscribers.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LlmChunk {
    /// Chunk text.
    pub delta: String,
}

/// A single upstream completion provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable provider identifier.
    fn id(&self) -> &str;

    /// Models this provider can serve.
    fn models(&self) -> Vec<String>;

    /// Performs a completion.
    async fn complete(&self, request: &LlmRequest) -> ServiceResult<LlmResponse>;

    /// Performs a streaming completion, pushing chunks into `chunks` and
    /// returning the final aggregate response. The default implementation
    /// completes non-streamed and pushes a single chunk.
    async fn complete_stream(
        &self,
        request: &LlmRequest,
        chunks: mpsc::Sender<LlmChunk>,
    ) -> ServiceResult<LlmResponse> {
        let response = self.complete(request).await?;
        let _ = chunks
            .send(LlmChunk {
                delta: response.content.clone(),
            })
            .await;
        Ok(response)
    }
}

/// Routes requests across providers with per-provider retry and failover.
pub struct LlmRouter {
    providers: Vec<Arc<dyn LlmProvider>>,
    retries_per_provider: u32,
}

impl fmt::Debug for LlmRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.providers.iter().map(|p| p.id()).collect();
        f.debug_struct("LlmRouter")
            .field("providers", &ids)
            .field("retries_per_provider", &self.retries_per_provider)
            .finish()
    }
}

impl LlmRouter {
    /// Creates a router over the supplied providers, consulted in order.
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        Self {
            providers,
            retries_per_provider: 1,
        }
    }

    /// Overrides the retry count applied before failing over.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries_per_provider = retries;
        self
    }

    /// Returns the number of registered providers.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Returns the registered provider identifiers.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_owned()).collect()
    }

    /// Union of models across providers, deduplicated, insertion-ordered.
    #[must_use]
    pub fn list_models(&self) -> Vec<String> {
        let mut models = Vec::new();
        for provider in &self.providers {
            for model in provider.models() {
                if !models.contains(&model) {
                    models.push(model);
                }
            }
        }
        models
    }

    /// Routes a completion, retrying each provider then failing over to
    /// the next.
    ///
    /// # Errors
    ///
    /// Returns the final provider error when all providers are exhausted,
    /// or a backend error when no provider is registered.
    pub async fn route(&self, request: &LlmRequest) -> ServiceResult<LlmResponse> {
        self.route_inner(request, None).await
    }

    /// Routes a streaming completion. Chunks flow into `chunks`; the
    /// aggregate response is returned once the provider finishes.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`LlmRouter::route`].
    pub async fn route_stream(
        &self,
        request: &LlmRequest,
        chunks: mpsc::Sender<LlmChunk>,
    ) -> ServiceResult<LlmResponse> {
        self.route_inner(request, Some(chunks)).await
    }

    async fn route_inner(
        &self,
        request: &LlmRequest,
        chunks: Option<mpsc::Sender<LlmChunk>>,
    ) -> ServiceResult<LlmResponse> {
        if self.providers.is_empty() {
            return Err(ServiceError::backend("no LLM providers registered"));
        }

        let mut last_error = None;
        for provider in &self.providers {
            for attempt in 0..=self.retries_per_provider {
                let started = Instant::now();
                let result = match &chunks {
                    Some(chunks) => provider.complete_stream(request, chunks.clone()).await,
                    None => provider.complete(request).await,
                };
                match result {
                    Ok(mut response) => {
                        response.latency_ms = started.elapsed().as_millis() as u64;
                        debug!(
                            provider = provider.id(),
                            model = %response.model,
                            latency_ms = response.latency_ms,
                            "completion routed"
                        );
                        return Ok(response);
                    }
                    Err(err) => {
                        warn!(
                            provider = provider.id(),
                            attempt,
                            error = %err,
                            "provider attempt failed"
                        );
                        last_error = Some(err);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ServiceError::backend("no provider attempted")))
    }
}

/// Deterministic provider that echoes the last user message.
///
/// Serves as the reference provider for tests and offline deployments.
#[derive(Debug, Clone)]
pub struct EchoProvider {
    id: String,
    model: String,
}

impl EchoProvider {
    /// Creates an echo provider advertising the supplied model name.
    #[must_use]
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for EchoProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn models(&self) -> Vec<String> {
        vec![self.model.clone()]
    }

    async fn complete(&self, request: &LlmRequest) -> ServiceResult<LlmResponse> {
        let prompt_tokens: u64 = request
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as u64)
            .sum();
        let content = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let output_tokens = content.split_whitespace().count() as u64;
        Ok(LlmResponse {
            content,
            model: request.model.clone(),
            usage: LlmUsage {
                input_tokens: prompt_tokens,
                output_tokens,
            },
            provider_id: self.id.clone(),
            latency_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingProvider {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for FailingProvider {
        fn id(&self) -> &str {
            "failing"
        }

        fn models(&self) -> Vec<String> {
            vec!["broken".into()]
        }

        async fn complete(&self, _request: &LlmRequest) -> ServiceResult<LlmResponse> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::backend("provider down"))
        }
    }

    fn request() -> LlmRequest {
        LlmRequest {
            model: "echo-1".into(),
            messages: vec![ChatMessage::user("ping")],
            max_tokens: None,
            temperature: None,
        }
    }

    #[tokio::test]
    async fn failover_reaches_healthy_provider() {
        let failing = Arc::new(FailingProvider {
            attempts: AtomicUsize::new(0),
        });
        let router = LlmRouter::new(vec![
            failing.clone(),
            Arc::new(EchoProvider::new("echo", "echo-1")),
        ])
        .with_retries(1);

        let response = router.route(&request()).await.unwrap();
        assert_eq!(response.provider_id, "echo");
        assert_eq!(response.content, "ping");
        // Initial attempt plus one retry before failover.
        assert_eq!(failing.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_router_errors() {
        let router = LlmRouter::new(Vec::new());
        assert!(router.route(&request()).await.is_err());
    }

    #[tokio::test]
    async fn stream_default_pushes_single_chunk() {
        let router = LlmRouter::new(vec![Arc::new(EchoProvider::new("echo", "echo-1"))]);
        let (tx, mut rx) = mpsc::channel(4);
        let response = router.route_stream(&request(), tx).await.unwrap();
        assert_eq!(response.content, "ping");
        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.delta, "ping");
    }
}
