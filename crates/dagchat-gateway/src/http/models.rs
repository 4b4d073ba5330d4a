use axum::response::{IntoResponse, Response};
use tracing::info;

use dagchat_providers::KNOWN_PROVIDERS;

use crate::envelope::Envelope;

/// GET /api/v1/models — the registered providers with display names.
pub async fn get_models() -> Response {
    info!("models endpoint accessed");
    let models: Vec<serde_json::Value> = KNOWN_PROVIDERS
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.id,
                "display_name": p.display_name,
            })
        })
        .collect();
    Envelope::ok(serde_json::json!(models)).into_response()
}
