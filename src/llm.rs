//! Language model provider abstraction
//!
//! The orchestrator only sees [`ModelProvider`]; concrete backends translate
//! conversation history to their wire format and back.

mod error;
mod openai;
mod types;

pub use error::{ProviderError, ProviderErrorKind};
pub use openai::{OpenAiConfig, OpenAiProvider, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for model providers
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Ask the model for the next reply given the full history
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ProviderError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: ModelProvider + ?Sized> ModelProvider for Arc<T> {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ProviderError> {
        (**self).complete(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Logging wrapper for providers
pub struct LoggingProvider {
    inner: Arc<dyn ModelProvider>,
    model_id: String,
}

impl LoggingProvider {
    pub fn new(inner: Arc<dyn ModelProvider>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl ModelProvider for LoggingProvider {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ProviderError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(reply) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    history_len = request.messages.len(),
                    tool_requests = reply.tool_requests.len(),
                    input_tokens = reply.usage.input_tokens,
                    output_tokens = reply.usage.output_tokens,
                    "Model request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    "Model request failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
