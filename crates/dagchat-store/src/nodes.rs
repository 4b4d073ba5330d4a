use std::sync::Mutex;

use dagchat_core::types::Role;
use rusqlite::Connection;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::types::MessageNode;

const NODE_COLUMNS: &str = "id, conversation_id, role, content, reasoning, model,
             parent_ids, children, create_time, update_time";

/// Thread-safe store for message-node documents.
///
/// Nodes are variable-arity (multiple parents, multiple children), so the
/// rows are document-shaped: edge lists are JSON columns and the only
/// queries are primary-key batches and per-conversation scans.
pub struct NodeStore {
    db: Mutex<Connection>,
}

impl NodeStore {
    /// Wrap an already-open (and `init_nodes_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Insert a node document, filling `id` and timestamps when absent.
    /// Returns the node id.
    #[instrument(skip(self, doc), fields(conversation_id = %doc.conversation_id, role = %doc.role))]
    pub fn insert(&self, mut doc: MessageNode) -> Result<String> {
        if doc.id.is_empty() {
            doc.id = Uuid::now_v7().to_string();
        }
        let now = chrono::Utc::now().to_rfc3339();
        if doc.create_time.is_empty() {
            doc.create_time = now.clone();
        }
        if doc.update_time.is_empty() {
            doc.update_time = now;
        }

        let parent_ids = serde_json::to_string(&doc.parent_ids)?;
        let children = serde_json::to_string(&doc.children)?;

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO message_node
             (id, conversation_id, role, content, reasoning, model,
              parent_ids, children, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                doc.id,
                doc.conversation_id,
                doc.role.as_str(),
                doc.content,
                doc.reasoning,
                doc.model,
                parent_ids,
                children,
                doc.create_time,
                doc.update_time,
            ],
        )?;
        debug!(id = %doc.id, "inserted message node");
        Ok(doc.id)
    }

    /// Batched primary-key lookup. Unknown ids are simply absent from the
    /// result; rows come back id-sorted so callers see a stable order.
    pub fn find_by_ids(&self, ids: &[String]) -> Result<Vec<MessageNode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM message_node WHERE id IN ({placeholders}) ORDER BY id"
        );
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), row_to_node)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Database)
    }

    /// All nodes of a conversation in create-time ascending order
    /// (id as tiebreaker). Serves the history endpoint.
    pub fn find_by_conversation(&self, conversation_id: &str) -> Result<Vec<MessageNode>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM message_node
             WHERE conversation_id = ?1
             ORDER BY create_time ASC, id ASC"
        ))?;
        let rows = stmt.query_map(rusqlite::params![conversation_id], row_to_node)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Database)
    }

    /// Full-document replace; bumps `update_time`.
    #[instrument(skip(self, doc))]
    pub fn update(&self, id: &str, doc: &MessageNode) -> Result<()> {
        let parent_ids = serde_json::to_string(&doc.parent_ids)?;
        let children = serde_json::to_string(&doc.children)?;
        let now = chrono::Utc::now().to_rfc3339();

        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE message_node
             SET conversation_id = ?1, role = ?2, content = ?3, reasoning = ?4,
                 model = ?5, parent_ids = ?6, children = ?7, update_time = ?8
             WHERE id = ?9",
            rusqlite::params![
                doc.conversation_id,
                doc.role.as_str(),
                doc.content,
                doc.reasoning,
                doc.model,
                parent_ids,
                children,
                now,
                id,
            ],
        )?;
        if rows_changed == 0 {
            return Err(StoreError::NodeNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Append `child_id` to the parent's `children` unless already present.
    /// Returns whether the list changed. Set-insertion keeps the mirror
    /// edge idempotent under request retries.
    pub fn add_child_if_absent(&self, parent_id: &str, child_id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let children_json: String = match db.query_row(
            "SELECT children FROM message_node WHERE id = ?1",
            rusqlite::params![parent_id],
            |row| row.get(0),
        ) {
            Ok(json) => json,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(StoreError::NodeNotFound {
                    id: parent_id.to_string(),
                })
            }
            Err(e) => return Err(StoreError::Database(e)),
        };

        let mut children: Vec<String> = serde_json::from_str(&children_json)?;
        if children.iter().any(|c| c == child_id) {
            return Ok(false);
        }
        children.push(child_id.to_string());

        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "UPDATE message_node SET children = ?1, update_time = ?2 WHERE id = ?3",
            rusqlite::params![serde_json::to_string(&children)?, now, parent_id],
        )?;
        Ok(true)
    }

    /// Cascade from a conversation delete. Returns the number of removed nodes.
    #[instrument(skip(self))]
    pub fn delete_by_conversation(&self, conversation_id: &str) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let removed = db.execute(
            "DELETE FROM message_node WHERE conversation_id = ?1",
            rusqlite::params![conversation_id],
        )?;
        Ok(removed)
    }
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageNode> {
    let role_str: String = row.get(2)?;
    let role: Role = role_str
        .parse()
        .map_err(|e: String| conversion_err(2, e))?;
    let parent_ids_json: String = row.get(6)?;
    let parent_ids: Vec<String> =
        serde_json::from_str(&parent_ids_json).map_err(|e| conversion_err(6, e.to_string()))?;
    let children_json: String = row.get(7)?;
    let children: Vec<String> =
        serde_json::from_str(&children_json).map_err(|e| conversion_err(7, e.to_string()))?;

    Ok(MessageNode {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role,
        content: row.get(3)?,
        reasoning: row.get(4)?,
        model: row.get(5)?,
        parent_ids,
        children,
        create_time: row.get(8)?,
        update_time: row.get(9)?,
    })
}

fn conversion_err(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        message.into(),
    )
}
