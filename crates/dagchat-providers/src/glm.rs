use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use dagchat_core::types::ChatMessage;

use crate::openai_compat::{
    build_chat_body, build_client, post_chat, relay_stream, request_title, title_fallback,
};
use crate::provider::{ModelProvider, ProviderError, StreamEvent};

/// One model serves both modes; the thinking channel is toggled via the
/// request body instead.
const MODEL: &str = "glm-5";

pub struct GlmProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GlmProvider {
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
impl ModelProvider for GlmProvider {
    fn name(&self) -> &str {
        "glm"
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        deep_thinking: bool,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let thinking = if deep_thinking { "enabled" } else { "disabled" };
        let extra = serde_json::json!({
            "max_tokens": 65536,
            "temperature": 1.0,
            "thinking": {"type": thinking},
        });
        debug!(model = MODEL, deep_thinking, "sending streaming request to GLM");

        let body = build_chat_body(MODEL, messages, true, Some(&extra));
        let resp = post_chat(&self.client, &self.base_url, &self.api_key, &body).await?;
        relay_stream(resp, tx).await;
        Ok(())
    }

    async fn title(&self, user_input: &str, full_reply: &str) -> String {
        let extra = serde_json::json!({
            "max_tokens": 20,
            "thinking": {"type": "disabled"},
        });
        match request_title(
            &self.client,
            &self.base_url,
            &self.api_key,
            MODEL,
            Some(&extra),
            user_input,
            full_reply,
        )
        .await
        {
            Ok(title) => title,
            Err(e) => {
                warn!(error = %e, "GLM title generation failed");
                title_fallback(full_reply)
            }
        }
    }
}
