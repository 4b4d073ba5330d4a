use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Uniform `{code, message, data}` response body used by the data
/// endpoints. `code` 0 means success; errors keep HTTP 200 with a
/// non-zero code, matching what the frontend expects, except validation
/// failures which also set HTTP 400.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub code: i64,
    pub message: String,
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data,
        }
    }

    pub fn err(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: serde_json::json!({}),
        }
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}
