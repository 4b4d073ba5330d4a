//! Streaming chat endpoint — POST /api/v1/chat
//!
//! One turn: rebuild the ancestor history for the requested parent nodes,
//! linearize it, relay the provider's token stream to the client as SSE
//! frames, and persist the new user/assistant nodes with mirrored graph
//! edges once the stream completes.
//!
//! A client disconnect drops the response stream — and with it this
//! generator — before the persistence step runs, so an aborted turn
//! leaves no trace.

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use dagchat_core::types::{ChatMessage, Role};
use dagchat_graph::{build_subdag, chain_preserving_sort};
use dagchat_providers::{ModelProvider, StreamEvent};
use dagchat_store::metadata::merge_model_set;
use dagchat_store::{MessageNode, StoreError};

use crate::app::AppState;
use crate::envelope::Envelope;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: String,
    pub message: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub parent_ids: Option<Vec<String>>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub deep_thinking: bool,
    /// Accepted for wire compatibility; search is not implemented.
    #[serde(default)]
    #[allow(dead_code)]
    pub search_enabled: bool,
}

fn default_user_id() -> String {
    "default".to_string()
}

fn default_model() -> String {
    "deepseek-r1".to_string()
}

/// POST /api/v1/chat — SSE streaming chat turn.
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Response {
    info!(
        user_id = %req.user_id,
        conversation_id = %req.conversation_id,
        model = %req.model,
        parents = req.parent_ids.as_ref().map(|p| p.len()).unwrap_or(0),
        "chat endpoint accessed"
    );

    if req.conversation_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Envelope::err(400, "invalid conversation_id: must not be empty"),
        )
            .into_response();
    }

    let provider = state.providers.get(&req.model);
    let frames = turn_stream(state, req, provider);
    let stream = futures_util::StreamExt::map(frames, |json| {
        Ok::<_, Infallible>(Event::default().data(json))
    });
    Sse::new(stream).into_response()
}

/// The per-turn SSE frame sequence. Each item is one frame's JSON payload.
///
/// Kept separate from the handler so tests can drive the turn (and drop
/// it mid-stream) without an HTTP server.
pub(crate) fn turn_stream(
    state: Arc<AppState>,
    req: ChatRequest,
    provider: Option<Arc<dyn ModelProvider>>,
) -> impl futures_util::Stream<Item = String> {
    async_stream::stream! {
        let Some(provider) = provider else {
            yield serde_json::json!({
                "error": format!("unsupported model: {}", req.model),
            })
            .to_string();
            return;
        };

        // History assembly: the ancestor closure of the requested parents,
        // linearized. No parents (or an empty closure) means a first ask.
        let parent_ids = req.parent_ids.clone().unwrap_or_default();
        let mut history: Vec<ChatMessage> = Vec::new();
        let mut first_ask = true;

        if !parent_ids.is_empty() {
            match build_subdag(&state.nodes, &parent_ids) {
                Ok(dag) if !dag.is_empty() => {
                    let ordered = chain_preserving_sort(&dag);
                    info!(nodes = dag.len(), "built history from parent chain");
                    history = ordered
                        .iter()
                        .filter_map(|id| dag.node_map.get(id))
                        .map(|node| ChatMessage::new(node.role, node.content.clone()))
                        .collect();
                    first_ask = false;
                }
                Ok(_) => {
                    warn!(?parent_ids, "no valid message nodes found for parent ids");
                }
                Err(e) => {
                    error!(error = %e, "history assembly failed");
                    yield serde_json::json!({"error": "streaming failed"}).to_string();
                    return;
                }
            }
        }
        history.push(ChatMessage::new(Role::User, req.message.clone()));

        // Upstream relay: the provider pushes events into the channel from
        // its own task; frames go out in the exact order they arrive.
        let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
        {
            let provider = provider.clone();
            let messages = history.clone();
            let deep_thinking = req.deep_thinking;
            tokio::spawn(async move {
                if let Err(e) = provider.stream_chat(&messages, deep_thinking, tx.clone()).await {
                    warn!(error = %e, "provider stream failed");
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: "model service unavailable".to_string(),
                            details: e.to_string(),
                        })
                        .await;
                }
            });
        }

        let mut full_content = String::new();
        let mut full_reasoning = String::new();
        let mut completed = false;

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Delta { content, reasoning } => {
                    full_content.push_str(&content);
                    full_reasoning.push_str(&reasoning);
                    yield serde_json::json!({
                        "content": content,
                        "reasoning": reasoning,
                    })
                    .to_string();
                }
                StreamEvent::Error { message, details } => {
                    yield serde_json::json!({
                        "error": message,
                        "details": details,
                    })
                    .to_string();
                    return;
                }
                StreamEvent::Done => {
                    completed = true;
                    break;
                }
            }
        }

        if !completed {
            error!("upstream stream ended without a terminal event");
            yield serde_json::json!({"error": "streaming failed"}).to_string();
            return;
        }

        match save_turn(
            &state,
            &req,
            provider.as_ref(),
            &full_content,
            &full_reasoning,
            first_ask,
        )
        .await
        {
            Ok((user_message_id, assistant_message_id)) => {
                yield serde_json::json!({
                    "user_message_id": user_message_id,
                    "assistant_message_id": assistant_message_id,
                    "complete": true,
                })
                .to_string();
            }
            Err(e) => {
                // The tokens the client already saw stand; the mismatch is
                // logged for repair and no error frame is sent.
                error!(error = %e, "failed to persist chat turn");
            }
        }
    }
}

/// Persist one completed turn: the user node, its mirrored parent edges,
/// the assistant node (parents seeded at insert), and the conversation
/// header (title on first ask, model set always).
async fn save_turn(
    state: &AppState,
    req: &ChatRequest,
    provider: &dyn ModelProvider,
    full_content: &str,
    full_reasoning: &str,
    first_ask: bool,
) -> Result<(String, String), StoreError> {
    let parent_ids = req.parent_ids.clone().unwrap_or_default();

    let user_node = MessageNode::new(&req.conversation_id, Role::User, &req.message)
        .with_model(&req.model)
        .with_parent_ids(parent_ids.clone());
    let user_message_id = state.nodes.insert(user_node)?;

    // Mirror edges on the existing parents. Set-insertion keeps this
    // idempotent under HTTP-level retries; nonexistent parents are skipped.
    if !parent_ids.is_empty() {
        for parent in state.nodes.find_by_ids(&parent_ids)? {
            state.nodes.add_child_if_absent(&parent.id, &user_message_id)?;
        }
    }

    let mut assistant_node = MessageNode::new(&req.conversation_id, Role::Assistant, full_content)
        .with_model(&req.model)
        .with_parent_ids(vec![user_message_id.clone()]);
    if !full_reasoning.is_empty() {
        assistant_node.reasoning = Some(full_reasoning.to_string());
    }
    let assistant_message_id = state.nodes.insert(assistant_node)?;
    state
        .nodes
        .add_child_if_absent(&user_message_id, &assistant_message_id)?;

    update_metadata(state, req, provider, full_content, first_ask).await;

    Ok((user_message_id, assistant_message_id))
}

/// Header maintenance after a turn. Failures here never reach the client:
/// the nodes are already durable and the discrepancy is only logged.
async fn update_metadata(
    state: &AppState,
    req: &ChatRequest,
    provider: &dyn ModelProvider,
    full_content: &str,
    first_ask: bool,
) {
    let models = match state.metadata.read_models(&req.conversation_id) {
        Ok(existing) => merge_model_set(&existing, provider.name()),
        Err(e) => {
            warn!(error = %e, "conversation header missing; skipping metadata update");
            return;
        }
    };

    let result = if first_ask {
        let title = provider.title(&req.message, full_content).await;
        info!(title = %title, "generated conversation title");
        state
            .metadata
            .update_header(&req.conversation_id, Some(&title), Some(&models))
    } else {
        state
            .metadata
            .update_header(&req.conversation_id, None, Some(&models))
    };

    if let Err(e) = result {
        error!(error = %e, "metadata update failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dagchat_core::config::DagchatConfig;
    use dagchat_providers::ProviderError;
    use dagchat_store::db::{init_metadata_db, init_nodes_db};
    use dagchat_store::{MetadataStore, NodeStore};
    use futures_util::StreamExt;
    use std::sync::Mutex;

    struct MockProvider {
        events: Vec<StreamEvent>,
        title: &'static str,
        seen_messages: Mutex<Vec<ChatMessage>>,
    }

    impl MockProvider {
        fn completing(chunks: &[&str], title: &'static str) -> Self {
            let mut events: Vec<StreamEvent> = chunks
                .iter()
                .map(|c| StreamEvent::Delta {
                    content: c.to_string(),
                    reasoning: String::new(),
                })
                .collect();
            events.push(StreamEvent::Done);
            Self {
                events,
                title,
                seen_messages: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                events: vec![StreamEvent::Error {
                    message: "model service unavailable".to_string(),
                    details: "upstream 500".to_string(),
                }],
                title: "unused",
                seen_messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn stream_chat(
            &self,
            messages: &[ChatMessage],
            _deep_thinking: bool,
            tx: mpsc::Sender<StreamEvent>,
        ) -> Result<(), ProviderError> {
            self.seen_messages
                .lock()
                .unwrap()
                .extend(messages.iter().cloned());
            for event in self.events.clone() {
                if tx.send(event).await.is_err() {
                    return Ok(());
                }
            }
            Ok(())
        }

        async fn title(&self, _user_input: &str, _full_reply: &str) -> String {
            self.title.to_string()
        }
    }

    fn test_state() -> Arc<AppState> {
        let meta_conn = rusqlite::Connection::open_in_memory().unwrap();
        init_metadata_db(&meta_conn).unwrap();
        let node_conn = rusqlite::Connection::open_in_memory().unwrap();
        init_nodes_db(&node_conn).unwrap();
        Arc::new(AppState::new(
            DagchatConfig::default(),
            MetadataStore::new(meta_conn),
            NodeStore::new(node_conn),
        ))
    }

    fn request(conversation_id: &str, message: &str, parent_ids: Option<Vec<String>>) -> ChatRequest {
        ChatRequest {
            conversation_id: conversation_id.to_string(),
            message: message.to_string(),
            user_id: "alice".to_string(),
            parent_ids,
            model: "deepseek-r1".to_string(),
            deep_thinking: false,
            search_enabled: false,
        }
    }

    #[tokio::test]
    async fn first_turn_streams_persists_and_titles() {
        let state = test_state();
        state.metadata.create("c1", "alice", "deepseek").unwrap();

        let mock: Arc<dyn ModelProvider> = Arc::new(MockProvider::completing(
            &["北京", "是中国", "的首都"],
            "北京是哪国的首都",
        ));
        let frames: Vec<String> =
            turn_stream(state.clone(), request("c1", "北京是哪国的首都？", None), Some(mock))
                .collect()
                .await;

        assert_eq!(frames.len(), 4);
        assert!(frames[0].contains(r#""content":"北京""#));
        assert!(frames[3].contains(r#""complete":true"#));

        let nodes = state.nodes.find_by_conversation("c1").unwrap();
        assert_eq!(nodes.len(), 2);
        let user = &nodes[0];
        let assistant = &nodes[1];
        assert_eq!(user.role, Role::User);
        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(assistant.content, "北京是中国的首都");
        // mirrored edges between the fresh pair
        assert_eq!(assistant.parent_ids, vec![user.id.clone()]);
        assert_eq!(user.children, vec![assistant.id.clone()]);

        let (rows, _) = state.metadata.list("alice", 1, 10).unwrap();
        assert_eq!(rows[0].title, "北京是哪国的首都");
        assert!(rows[0].title.chars().count() <= 20);
        assert_eq!(rows[0].model, "deepseek,mock");
    }

    #[tokio::test]
    async fn follow_up_feeds_linearized_history_to_the_provider() {
        let state = test_state();
        state.metadata.create("c1", "alice", "mock").unwrap();

        // seed the first exchange
        let first: Arc<dyn ModelProvider> =
            Arc::new(MockProvider::completing(&["reply one"], "t"));
        let _: Vec<String> =
            turn_stream(state.clone(), request("c1", "question one", None), Some(first))
                .collect()
                .await;
        let assistant_id = state.nodes.find_by_conversation("c1").unwrap()[1].id.clone();

        let second = Arc::new(MockProvider::completing(&["reply two"], "t"));
        let frames: Vec<String> = turn_stream(
            state.clone(),
            request("c1", "question two", Some(vec![assistant_id.clone()])),
            Some(second.clone() as Arc<dyn ModelProvider>),
        )
        .collect()
        .await;
        assert!(frames.last().unwrap().contains(r#""complete":true"#));

        let seen = second.seen_messages.lock().unwrap();
        let transcript: Vec<(&str, &str)> = seen
            .iter()
            .map(|m| (m.role.as_str(), m.content.as_str()))
            .collect();
        assert_eq!(
            transcript,
            vec![
                ("user", "question one"),
                ("assistant", "reply one"),
                ("user", "question two"),
            ]
        );
        drop(seen);

        // the branch point gained a second child edge set
        let nodes = state.nodes.find_by_conversation("c1").unwrap();
        assert_eq!(nodes.len(), 4);
        let parent = nodes.iter().find(|n| n.id == assistant_id).unwrap();
        assert_eq!(parent.children.len(), 1);
        // title set by the first turn survives the follow-up
        let (rows, _) = state.metadata.list("alice", 1, 10).unwrap();
        assert_eq!(rows[0].title, "t");
    }

    #[tokio::test]
    async fn client_disconnect_mid_stream_persists_nothing() {
        let state = test_state();
        state.metadata.create("c1", "alice", "deepseek").unwrap();
        let update_time_before = state.metadata.list("alice", 1, 10).unwrap().0[0]
            .update_time
            .clone();

        let mock: Arc<dyn ModelProvider> =
            Arc::new(MockProvider::completing(&["a", "b", "c"], "never"));
        {
            let stream = turn_stream(state.clone(), request("c1", "hi", None), Some(mock));
            futures_util::pin_mut!(stream);
            for _ in 0..3 {
                stream.next().await.unwrap();
            }
            // dropping the stream here models the broken SSE sink
        }

        assert!(state.nodes.find_by_conversation("c1").unwrap().is_empty());
        let rows = state.metadata.list("alice", 1, 10).unwrap().0;
        assert_eq!(rows[0].update_time, update_time_before);
        assert_eq!(rows[0].title, "");
    }

    #[tokio::test]
    async fn upstream_error_ends_the_stream_without_persistence() {
        let state = test_state();
        state.metadata.create("c1", "alice", "deepseek").unwrap();

        let mock: Arc<dyn ModelProvider> = Arc::new(MockProvider::failing());
        let frames: Vec<String> =
            turn_stream(state.clone(), request("c1", "hi", None), Some(mock))
                .collect()
                .await;

        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains(r#""error":"model service unavailable""#));
        assert!(frames[0].contains("upstream 500"));
        assert!(state.nodes.find_by_conversation("c1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_model_yields_a_single_error_frame() {
        let state = test_state();
        let frames: Vec<String> =
            turn_stream(state, request("c1", "hi", None), None).collect().await;
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("unsupported model: deepseek-r1"));
    }

    #[tokio::test]
    async fn unresolvable_parents_fall_back_to_first_ask() {
        let state = test_state();
        state.metadata.create("c1", "alice", "deepseek").unwrap();

        let mock = Arc::new(MockProvider::completing(&["ok"], "fresh title"));
        let bogus = vec!["not-a-node-id".to_string()];
        let frames: Vec<String> = turn_stream(
            state.clone(),
            request("c1", "hi", Some(bogus)),
            Some(mock.clone() as Arc<dyn ModelProvider>),
        )
        .collect()
        .await;
        assert!(frames.last().unwrap().contains(r#""complete":true"#));

        // treated as a first ask: the title was generated
        let (rows, _) = state.metadata.list("alice", 1, 10).unwrap();
        assert_eq!(rows[0].title, "fresh title");
        // the provider saw only the new message
        assert_eq!(mock.seen_messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retried_edge_appends_stay_idempotent() {
        let state = test_state();
        state.metadata.create("c1", "alice", "deepseek").unwrap();

        let first: Arc<dyn ModelProvider> = Arc::new(MockProvider::completing(&["r1"], "t"));
        let _: Vec<String> =
            turn_stream(state.clone(), request("c1", "q1", None), Some(first))
                .collect()
                .await;
        let assistant_id = state.nodes.find_by_conversation("c1").unwrap()[1].id.clone();

        // two retries of the same follow-up against the same parent
        for _ in 0..2 {
            let mock: Arc<dyn ModelProvider> = Arc::new(MockProvider::completing(&["r2"], "t"));
            let _: Vec<String> = turn_stream(
                state.clone(),
                request("c1", "q2", Some(vec![assistant_id.clone()])),
                Some(mock),
            )
            .collect()
            .await;
        }

        let nodes = state.nodes.find_by_conversation("c1").unwrap();
        let parent = nodes.iter().find(|n| n.id == assistant_id).unwrap();
        // two distinct user nodes were created, each linked exactly once
        assert_eq!(parent.children.len(), 2);
        let unique: std::collections::HashSet<&String> = parent.children.iter().collect();
        assert_eq!(unique.len(), parent.children.len());
    }
}
