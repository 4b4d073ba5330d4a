use dagchat_core::types::Role;
use serde::{Deserialize, Serialize};

/// A conversation header row in the metadata store.
///
/// `model` is the comma-joined, insertion-ordered, deduplicated set of
/// provider names that have ever answered in this conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    /// Empty until the first assistant reply sets a ≤20-char summary.
    pub title: String,
    pub model: String,
    /// RFC3339 creation timestamp.
    pub create_time: String,
    /// RFC3339 timestamp of the last update.
    pub update_time: String,
}

/// A message-node document in the node store.
///
/// Edges live inside the document: `parent_ids` is authoritative and
/// `children` is its maintained mirror (deduplicated, insertion-ordered).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageNode {
    /// UUIDv7 string — opaque, lexicographically comparable, time-ordered.
    /// Filled by the store on insert when empty.
    #[serde(default)]
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    /// Assistant-side thinking trace, stored only when the provider emitted it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Which provider produced or hosted this turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub parent_ids: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub create_time: String,
    #[serde(default)]
    pub update_time: String,
}

impl MessageNode {
    /// A fresh node with no edges; id and timestamps are filled on insert.
    pub fn new(
        conversation_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            reasoning: None,
            model: None,
            parent_ids: Vec::new(),
            children: Vec::new(),
            create_time: String::new(),
            update_time: String::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_parent_ids(mut self, parent_ids: Vec<String>) -> Self {
        self.parent_ids = parent_ids;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}
