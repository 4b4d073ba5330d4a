//! Shared plumbing for the OpenAI-compatible chat completions wire format.
//! All four upstream vendors (DeepSeek, Qwen, Kimi, GLM) speak this
//! protocol; the adapters differ only in model selection and the extra
//! body parameters controlling the thinking channel.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use dagchat_core::types::ChatMessage;

use crate::provider::{ProviderError, StreamEvent};

/// Per-adapter HTTP client with the default 30 s connect/read timeouts.
pub(crate) fn build_client() -> Result<reqwest::Client, ProviderError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .read_timeout(Duration::from_secs(30))
        .build()?)
}

/// Assemble a chat completions request body. `extra` entries (thinking
/// switches, sampling parameters) are merged into the top-level object.
pub(crate) fn build_chat_body(
    model: &str,
    messages: &[ChatMessage],
    stream: bool,
    extra: Option<&serde_json::Value>,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "stream": stream,
    });
    if let Some(serde_json::Value::Object(map)) = extra {
        for (key, value) in map {
            body[key] = value.clone();
        }
    }
    body
}

/// POST a chat completions body, mapping failure statuses onto
/// `ProviderError`.
pub(crate) async fn post_chat(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    body: &serde_json::Value,
) -> Result<reqwest::Response, ProviderError> {
    let resp = client
        .post(format!("{base_url}/chat/completions"))
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited {
            retry_after_ms: retry_delay_ms(&resp),
        });
    }

    let message = resp.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %message, "chat completions API error");
    Err(ProviderError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Back-off for a 429: the `retry-after` header in seconds when the
/// vendor sends one, otherwise 5 s.
fn retry_delay_ms(resp: &reqwest::Response) -> u64 {
    let header = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok());
    match header.and_then(|v| v.parse::<u64>().ok()) {
        Some(seconds) => seconds * 1000,
        None => 5_000,
    }
}

/// Relay an SSE response body as `StreamEvent`s.
///
/// Bytes are buffered until a full line is available: a network chunk can
/// end mid-line or even mid-codepoint, so lines are only decoded once
/// newline-terminated. The relay stops silently when the receiver hangs
/// up (client disconnect).
pub(crate) async fn relay_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    use futures_util::StreamExt;

    let mut body = resp.bytes_stream();
    let mut pending: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => pending.extend_from_slice(&bytes),
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: "model service unavailable".to_string(),
                        details: e.to_string(),
                    })
                    .await;
                return;
            }
        }

        while let Some(end) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=end).collect();
            let outcome = match std::str::from_utf8(&line) {
                Ok(text) => deliver_line(text.trim(), &tx).await,
                Err(_) => LineOutcome::Next,
            };
            match outcome {
                LineOutcome::Next => {}
                LineOutcome::Finished => {
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }
                LineOutcome::Closed => return,
            }
        }
    }

    let _ = tx.send(StreamEvent::Done).await;
}

enum LineOutcome {
    /// Keep reading.
    Next,
    /// Upstream signalled the end of the stream.
    Finished,
    /// The receiver hung up; stop relaying.
    Closed,
}

/// Handle one SSE line. Only `data:` lines matter on this wire; event
/// names and keep-alive comments carry nothing.
async fn deliver_line(line: &str, tx: &mpsc::Sender<StreamEvent>) -> LineOutcome {
    let Some(payload) = data_payload(line) else {
        return LineOutcome::Next;
    };
    if payload == "[DONE]" {
        return LineOutcome::Finished;
    }
    let Ok(chunk) = serde_json::from_str::<StreamChunk>(payload) else {
        return LineOutcome::Next;
    };

    for choice in chunk.choices {
        let content = choice.delta.content.unwrap_or_default();
        let reasoning = choice.delta.reasoning_content.unwrap_or_default();
        if content.is_empty() && reasoning.is_empty() {
            continue;
        }
        debug!(
            content_len = content.len(),
            reasoning_len = reasoning.len(),
            "stream delta"
        );
        if tx
            .send(StreamEvent::Delta { content, reasoning })
            .await
            .is_err()
        {
            return LineOutcome::Closed;
        }
    }
    LineOutcome::Next
}

/// The value of a `data:` line, or `None` for anything else.
fn data_payload(line: &str) -> Option<&str> {
    match line.split_once(':') {
        Some(("data", value)) => Some(value.trim()),
        _ => None,
    }
}

/// One-shot title generation over the same wire: ask the vendor for a
/// ≤20-char summary of the first exchange.
pub(crate) async fn request_title(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    extra: Option<&serde_json::Value>,
    user_input: &str,
    full_reply: &str,
) -> Result<String, ProviderError> {
    let prompt = format!(
        "根据以下对话生成20字内标题（只需返回标题）：\n用户：{user_input}\nAI：{full_reply}"
    );
    let messages = [ChatMessage::new(dagchat_core::types::Role::User, prompt)];
    let body = build_chat_body(model, &messages, false, extra);

    let resp = post_chat(client, base_url, api_key, &body).await?;
    let api_resp: ApiResponse = resp
        .json()
        .await
        .map_err(|e| ProviderError::Parse(e.to_string()))?;

    let content = api_resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(ProviderError::Parse("empty title response".to_string()));
    }
    Ok(clip_title(&content))
}

/// Trim trailing period/newline noise and cap at 20 characters.
pub(crate) fn clip_title(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(['。', '.', '\n'])
        .chars()
        .take(20)
        .collect()
}

/// Degraded default when title generation fails: a 20-char reply prefix.
pub(crate) fn title_fallback(full_reply: &str) -> String {
    full_reply.chars().take(20).collect()
}

// Non-streaming response types (title generation needs only the content).

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

// Streaming chunk types.

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagchat_core::types::Role;

    #[test]
    fn body_carries_messages_and_stream_flag() {
        let messages = vec![
            ChatMessage::new(Role::User, "你好"),
            ChatMessage::new(Role::Assistant, "你好！"),
        ];
        let body = build_chat_body("qwen3-max", &messages, true, None);
        assert_eq!(body["model"], "qwen3-max");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "你好！");
    }

    #[test]
    fn extra_entries_merge_into_the_body() {
        let messages = vec![ChatMessage::new(Role::User, "hi")];
        let extra = serde_json::json!({
            "max_tokens": 65536,
            "thinking": {"type": "enabled"},
        });
        let body = build_chat_body("glm-5", &messages, true, Some(&extra));
        assert_eq!(body["max_tokens"], 65536);
        assert_eq!(body["thinking"]["type"], "enabled");
    }

    #[test]
    fn data_payload_extracts_only_data_lines() {
        assert_eq!(data_payload(r#"data: {"x":1}"#), Some(r#"{"x":1}"#));
        assert_eq!(data_payload("data:[DONE]"), Some("[DONE]"));
        assert_eq!(data_payload("event: ping"), None);
        assert_eq!(data_payload(": keep-alive"), None);
        assert_eq!(data_payload(""), None);
    }

    #[tokio::test]
    async fn deliver_line_forwards_deltas_and_stops_on_done() {
        let (tx, mut rx) = mpsc::channel(8);

        let delta = r#"data: {"choices":[{"delta":{"content":"你","reasoning_content":null}}]}"#;
        assert!(matches!(deliver_line(delta, &tx).await, LineOutcome::Next));
        match rx.try_recv().unwrap() {
            StreamEvent::Delta { content, reasoning } => {
                assert_eq!(content, "你");
                assert!(reasoning.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let thinking =
            r#"data: {"choices":[{"delta":{"content":null,"reasoning_content":"hmm"}}]}"#;
        assert!(matches!(deliver_line(thinking, &tx).await, LineOutcome::Next));
        match rx.try_recv().unwrap() {
            StreamEvent::Delta { reasoning, .. } => assert_eq!(reasoning, "hmm"),
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(matches!(
            deliver_line("data: [DONE]", &tx).await,
            LineOutcome::Finished
        ));
        // event names and comments are dropped without emitting anything
        assert!(matches!(deliver_line("event: ping", &tx).await, LineOutcome::Next));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn deliver_line_reports_a_gone_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let delta = r#"data: {"choices":[{"delta":{"content":"hi","reasoning_content":null}}]}"#;
        assert!(matches!(deliver_line(delta, &tx).await, LineOutcome::Closed));
    }

    #[test]
    fn clip_title_strips_trailing_punctuation_and_caps_chars() {
        assert_eq!(clip_title("北京的首都。\n"), "北京的首都");
        assert_eq!(clip_title("  A short title.  "), "A short title");
        let long = "字".repeat(30);
        assert_eq!(clip_title(&long).chars().count(), 20);
    }

    #[test]
    fn title_fallback_is_a_char_prefix() {
        let reply = "北京是中国的首都，也是政治和文化中心，历史悠久。";
        let fallback = title_fallback(reply);
        assert_eq!(fallback.chars().count(), 20);
        assert!(reply.starts_with(&fallback));
    }

    #[test]
    fn stream_chunk_parses_reasoning_deltas() {
        let data = r#"{"choices":[{"delta":{"content":"","reasoning_content":"thinking..."}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(data).unwrap();
        assert_eq!(
            chunk.choices[0].delta.reasoning_content.as_deref(),
            Some("thinking...")
        );
    }
}
