use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use dagchat_core::types::ChatMessage;

use crate::openai_compat::{
    build_chat_body, build_client, post_chat, relay_stream, request_title, title_fallback,
};
use crate::provider::{ModelProvider, ProviderError, StreamEvent};

const THINKING_MODEL: &str = "qwen-plus";
const DEFAULT_MODEL: &str = "qwen3-max";
const TITLE_MODEL: &str = "qwen3-max";

pub struct QwenProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl QwenProvider {
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
impl ModelProvider for QwenProvider {
    fn name(&self) -> &str {
        "qwen"
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        deep_thinking: bool,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        // The thinking variant needs an explicit opt-in on this endpoint.
        let (model, extra) = if deep_thinking {
            (
                THINKING_MODEL,
                Some(serde_json::json!({"enable_thinking": true})),
            )
        } else {
            (DEFAULT_MODEL, None)
        };
        debug!(model, deep_thinking, "sending streaming request to Qwen");

        let body = build_chat_body(model, messages, true, extra.as_ref());
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
                warn!(error = %e, "Qwen title generation failed");
                title_fallback(full_reply)
            }
        }
    }
}
