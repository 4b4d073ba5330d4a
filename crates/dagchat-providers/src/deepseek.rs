use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use dagchat_core::types::ChatMessage;

use crate::openai_compat::{
    build_chat_body, build_client, post_chat, relay_stream, request_title, title_fallback,
};
use crate::provider::{ModelProvider, ProviderError, StreamEvent};

/// Streaming model. The reasoner variant always emits a reasoning
/// channel, so the deep-thinking flag is ignored.
const STREAM_MODEL: &str = "deepseek-reasoner";
/// Cheaper non-reasoning model used for title generation.
const TITLE_MODEL: &str = "deepseek-chat";

pub struct DeepSeekProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl DeepSeekProvider {
    /// `base_url` should NOT include a trailing slash.
    pub fn new(api_key: String, base_url: String) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client()?,
            api_key,
            base_url,
        })
    }
}

#[async_trait]
impl ModelProvider for DeepSeekProvider {
    fn name(&self) -> &str {
        "deepseek"
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        _deep_thinking: bool,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        debug!(model = STREAM_MODEL, "sending streaming request to DeepSeek");
        let body = build_chat_body(STREAM_MODEL, messages, true, None);
        let resp = post_chat(&self.client, &self.base_url, &self.api_key, &body).await?;
        relay_stream(resp, tx).await;
        Ok(())
    }

    async fn title(&self, user_input: &str, full_reply: &str) -> String {
        let extra = serde_json::json!({"temperature": 0.3, "max_tokens": 20});
        match request_title(
            &self.client,
            &self.base_url,
            &self.api_key,
            TITLE_MODEL,
            Some(&extra),
            user_input,
            full_reply,
        )
        .await
        {
            Ok(title) => title,
            Err(e) => {
                warn!(error = %e, "DeepSeek title generation failed");
                title_fallback(full_reply)
            }
        }
    }
}
