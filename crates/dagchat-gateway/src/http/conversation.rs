//! Conversation management endpoints: create, list, history, rename,
//! delete. Data endpoints answer with the `{code, message, data}`
//! envelope; create answers with a bare `{conversation_id}` object.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use dagchat_store::StoreError;

use crate::app::AppState;
use crate::envelope::Envelope;

fn default_user_id() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "deepseek-r1".to_string()
}

/// POST /api/v1/create-conversation
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateConversationRequest>,
) -> Json<serde_json::Value> {
    let conversation_id = Uuid::new_v4().to_string();
    match state.metadata.create(&conversation_id, &req.user_id, &req.model) {
        Ok(()) => {
            info!(conversation_id = %conversation_id, "created conversation");
            Json(serde_json::json!({"conversation_id": conversation_id}))
        }
        Err(e) => {
            error!(error = %e, "failed to create conversation");
            Json(serde_json::json!({"error": format!("failed to create conversation: {e}")}))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

fn default_page() -> u64 {
    1
}
fn default_page_size() -> u64 {
    20
}

/// GET /api/v1/dialogue/list
pub async fn dialogue_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    info!(user_id = %query.user_id, page = query.page, page_size = query.page_size, "dialogue list accessed");

    if query.page < 1 {
        return bad_request("page", "must be >= 1");
    }
    if query.page_size < 1 || query.page_size > 100 {
        return bad_request("page_size", "must be between 1 and 100");
    }

    match state.metadata.list(&query.user_id, query.page, query.page_size) {
        Ok((rows, total)) => Envelope::ok(serde_json::json!({
            "list": rows,
            "total": total,
            "page": query.page,
            "page_size": query.page_size,
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "failed to list conversations");
            Envelope::err(500, format!("failed to list conversations: {e}")).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub dialogue_id: String,
}

/// GET /api/v1/dialogue/history — every node of the conversation in
/// create-time order, shaped for the frontend (reasoning surfaces as
/// `thinkingContent`, expanded by default for persisted turns).
pub async fn dialogue_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    info!(dialogue_id = %query.dialogue_id, "dialogue history accessed");

    match state.nodes.find_by_conversation(&query.dialogue_id) {
        Ok(nodes) => {
            let messages: Vec<serde_json::Value> = nodes
                .iter()
                .map(|node| {
                    let mut message = serde_json::json!({
                        "id": node.id,
                        "content": node.content,
                        "role": node.role,
                        "parent_ids": node.parent_ids,
                        "children": node.children,
                        "model": node.model,
                    });
                    if let Some(reasoning) = &node.reasoning {
                        message["thinkingContent"] = serde_json::json!(reasoning);
                        message["isThinkingExpanded"] = serde_json::json!(true);
                        message["isWaitingForFirstToken"] = serde_json::json!(false);
                    }
                    message
                })
                .collect();
            Envelope::ok(serde_json::json!(messages)).into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to load dialogue history");
            Envelope::err(500, format!("failed to load dialogue history: {e}")).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RenameQuery {
    pub conversation_id: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    pub new_title: String,
}

/// PUT /api/v1/dialogue/rename
pub async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RenameQuery>,
) -> Response {
    if query.conversation_id.trim().is_empty() {
        return bad_request("conversation_id", "must not be empty");
    }
    if query.user_id.trim().is_empty() {
        return bad_request("user_id", "must not be empty");
    }

    info!(
        conversation_id = %query.conversation_id,
        user_id = %query.user_id,
        new_title = %query.new_title,
        "rename conversation"
    );

    match state
        .metadata
        .rename(&query.conversation_id, &query.user_id, &query.new_title)
    {
        Ok(()) => Envelope::ok(serde_json::json!({})).into_response(),
        Err(StoreError::InvalidTitle(reason)) => bad_request("new_title", &reason),
        Err(e @ StoreError::NotFound { .. }) => {
            warn!(error = %e, "rename target not found");
            Envelope::err(500, format!("failed to rename conversation: {e}")).into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to rename conversation");
            Envelope::err(500, format!("failed to rename conversation: {e}")).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub conversation_id: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

/// DELETE /api/v1/dialogue/delete — cascade order: message nodes first,
/// then the header.
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteQuery>,
) -> Response {
    if query.conversation_id.trim().is_empty() {
        return bad_request("conversation_id", "must not be empty");
    }
    if query.user_id.trim().is_empty() {
        return bad_request("user_id", "must not be empty");
    }

    info!(conversation_id = %query.conversation_id, user_id = %query.user_id, "delete conversation");

    match state.nodes.delete_by_conversation(&query.conversation_id) {
        Ok(removed) => info!(removed, "deleted conversation message nodes"),
        Err(e) => error!(error = %e, "failed to delete conversation message nodes"),
    }

    match state
        .metadata
        .delete(&query.conversation_id, &query.user_id)
    {
        Ok(()) => Envelope::ok(serde_json::json!({})).into_response(),
        Err(e @ StoreError::NotFound { .. }) => {
            warn!(error = %e, "delete target not found");
            Envelope::err(500, format!("failed to delete conversation: {e}")).into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to delete conversation");
            Envelope::err(500, format!("failed to delete conversation: {e}")).into_response()
        }
    }
}

/// HTTP 400 with the envelope naming the offending field.
fn bad_request(field: &str, reason: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Envelope::err(400, format!("invalid {field}: {reason}")),
    )
        .into_response()
}
