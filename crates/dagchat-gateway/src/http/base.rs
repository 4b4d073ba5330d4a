use axum::Json;
use serde_json::{json, Value};
use tracing::info;

/// GET / — identity check for humans poking the server.
pub async fn root_handler() -> Json<Value> {
    Json(json!({"message": "Welcome to DAG-chat API!"}))
}

/// GET /api/v1/health — liveness probe.
pub async fn health_handler() -> Json<Value> {
    info!("health check endpoint accessed");
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "dagchat",
    }))
}

/// GET /api/v1/hello
pub async fn hello_handler() -> Json<Value> {
    info!("hello endpoint accessed");
    Json(json!({"message": "Hello World from DAG-chat!"}))
}

/// GET /api/v1/info
pub async fn info_handler() -> Json<Value> {
    info!("info endpoint accessed");
    Json(json!({
        "app": "dagchat",
        "version": env!("CARGO_PKG_VERSION"),
        "framework": "axum",
    }))
}
