use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No conversation matches the given `(id, user_id)` pair.
    #[error("conversation not found: {id}")]
    NotFound { id: String },

    /// No message node with the given id.
    #[error("message node not found: {id}")]
    NodeNotFound { id: String },

    /// Title failed validation (empty or longer than 64 characters).
    #[error("invalid title: {0}")]
    InvalidTitle(String),

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored document column could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
