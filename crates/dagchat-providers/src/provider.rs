use async_trait::async_trait;
use tokio::sync::mpsc;

use dagchat_core::types::ChatMessage;

/// Events emitted while relaying an upstream completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental content and/or reasoning text from the model.
    /// Reasoning stays empty for providers (or modes) without a thinking
    /// channel.
    Delta { content: String, reasoning: String },

    /// Terminal upstream failure; the sequence ends after this event.
    Error { message: String, details: String },

    /// Stream completed successfully.
    Done,
}

/// Common interface for all upstream LLM providers.
///
/// Each adapter owns its HTTP client and credentials; nothing is shared
/// across adapters.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name for logging, persistence, and the model-set rule.
    fn name(&self) -> &str;

    /// Stream a chat completion through a channel.
    ///
    /// Events arrive in upstream order and the sequence is finite: it ends
    /// with `Done`, or with `Error` on upstream failure. A send failure
    /// means the receiver is gone (client disconnected) and the adapter
    /// stops without error.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        deep_thinking: bool,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError>;

    /// Summarize the first exchange into a conversation title of at most
    /// 20 characters. Falls back to a 20-char prefix of `full_reply` when
    /// the upstream call fails.
    async fn title(&self, user_input: &str, full_reply: &str) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("missing API key for provider: {0}")]
    MissingCredentials(String),
}
