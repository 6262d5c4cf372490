//! Provider trait: the abstraction over completion backends.
//!
//! A Provider accepts an ordered list of role-tagged messages and returns the
//! reply text, or a typed failure. Retry, key rotation and timeouts are the
//! provider's own business; callers propagate its errors unchanged.
//!
//! Implementations: OpenAI-compatible endpoints (OpenAI, Claude, Google AI
//! Studio, DeepSeek, OpenRouter, Ollama, custom).

use crate::error::ProviderError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o", "deepseek-chat")
    pub model: String,

    /// The assembled messages, in prompt order
    pub messages: Vec<Message>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.8
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The raw reply text, before any post-processing
    pub content: String,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Send messages and get a complete reply.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Check if the provider is reachable and configured.
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
