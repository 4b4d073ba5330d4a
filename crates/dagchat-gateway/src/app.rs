use axum::{
    http::HeaderValue,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};

use dagchat_core::config::DagchatConfig;
use dagchat_providers::ProviderRegistry;
use dagchat_store::{MetadataStore, NodeStore};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: DagchatConfig,
    pub metadata: MetadataStore,
    pub nodes: NodeStore,
    pub providers: ProviderRegistry,
}

impl AppState {
    pub fn new(config: DagchatConfig, metadata: MetadataStore, nodes: NodeStore) -> Self {
        let providers = ProviderRegistry::new(config.providers.clone());
        Self {
            config,
            metadata,
            nodes,
            providers,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Credentialed CORS forbids wildcards, so methods/headers mirror the
    // preflight request instead.
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("http://localhost:3000"))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    Router::new()
        .route("/", get(crate::http::base::root_handler))
        .route(
            "/api/v1/create-conversation",
            post(crate::http::conversation::create_conversation),
        )
        .route("/api/v1/chat", post(crate::http::chat::chat_handler))
        .route(
            "/api/v1/dialogue/list",
            get(crate::http::conversation::dialogue_list),
        )
        .route(
            "/api/v1/dialogue/history",
            get(crate::http::conversation::dialogue_history),
        )
        .route(
            "/api/v1/dialogue/rename",
            put(crate::http::conversation::rename_conversation),
        )
        .route(
            "/api/v1/dialogue/delete",
            delete(crate::http::conversation::delete_conversation),
        )
        .route("/api/v1/models", get(crate::http::models::get_models))
        .route("/api/v1/health", get(crate::http::base::health_handler))
        .route("/api/v1/hello", get(crate::http::base::hello_handler))
        .route("/api/v1/info", get(crate::http::base::info_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
}
