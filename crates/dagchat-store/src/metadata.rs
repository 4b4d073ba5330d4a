use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, instrument};

use crate::error::{Result, StoreError};
use crate::types::Conversation;

pub const MAX_TITLE_CHARS: usize = 64;

/// Thread-safe store for conversation headers.
///
/// Wraps a single SQLite connection in a `Mutex`. For high-concurrency
/// deployments consider a connection pool, but a Mutex is sufficient for
/// a single-node deployment.
pub struct MetadataStore {
    db: Mutex<Connection>,
}

impl MetadataStore {
    /// Wrap an already-open (and `init_metadata_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Insert a new conversation header with an empty title.
    #[instrument(skip(self))]
    pub fn create(&self, id: &str, user_id: &str, model: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO t_conversations (id, user_id, title, model, create_time, update_time)
             VALUES (?1, ?2, '', ?3, ?4, ?4)",
            rusqlite::params![id, user_id, model, now],
        )?;
        Ok(())
    }

    /// Partial header update: always bumps `update_time`; `title` and
    /// `model` are written only when given.
    #[instrument(skip(self, title, model))]
    pub fn update_header(&self, id: &str, title: Option<&str>, model: Option<&str>) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let rows_changed = match (title, model) {
            (Some(t), Some(m)) => db.execute(
                "UPDATE t_conversations SET title = ?1, model = ?2, update_time = ?3 WHERE id = ?4",
                rusqlite::params![t, m, now, id],
            )?,
            (Some(t), None) => db.execute(
                "UPDATE t_conversations SET title = ?1, update_time = ?2 WHERE id = ?3",
                rusqlite::params![t, now, id],
            )?,
            (None, Some(m)) => db.execute(
                "UPDATE t_conversations SET model = ?1, update_time = ?2 WHERE id = ?3",
                rusqlite::params![m, now, id],
            )?,
            (None, None) => db.execute(
                "UPDATE t_conversations SET update_time = ?1 WHERE id = ?2",
                rusqlite::params![now, id],
            )?,
        };
        if rows_changed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Page through a user's conversations, most recently updated first.
    /// Returns the page rows and the total row count for the user.
    #[instrument(skip(self))]
    pub fn list(&self, user_id: &str, page: u64, page_size: u64) -> Result<(Vec<Conversation>, u64)> {
        let offset = (page.max(1) - 1) * page_size;
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, user_id, title, model, create_time, update_time
             FROM t_conversations
             WHERE user_id = ?1
             ORDER BY update_time DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![user_id, page_size as i64, offset as i64],
            row_to_conversation,
        )?;
        let conversations: Vec<Conversation> = rows.filter_map(|r| r.ok()).collect();

        let total: i64 = db.query_row(
            "SELECT COUNT(*) FROM t_conversations WHERE user_id = ?1",
            rusqlite::params![user_id],
            |row| row.get(0),
        )?;

        debug!(count = conversations.len(), total, "listed conversations");
        Ok((conversations, total as u64))
    }

    /// Rename a conversation. Fails with `NotFound` when `(id, user_id)`
    /// does not match a row; rejects empty or over-long titles.
    #[instrument(skip(self, new_title))]
    pub fn rename(&self, id: &str, user_id: &str, new_title: &str) -> Result<()> {
        let trimmed = new_title.trim();
        if trimmed.is_empty() {
            return Err(StoreError::InvalidTitle("title must not be empty".into()));
        }
        if new_title.chars().count() > MAX_TITLE_CHARS {
            return Err(StoreError::InvalidTitle(format!(
                "title must not exceed {MAX_TITLE_CHARS} characters"
            )));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE t_conversations SET title = ?1, update_time = ?2
             WHERE id = ?3 AND user_id = ?4",
            rusqlite::params![new_title, now, id, user_id],
        )?;
        if rows_changed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Remove the header only. Callers must separately ask the node store
    /// to delete the conversation's message nodes.
    #[instrument(skip(self))]
    pub fn delete(&self, id: &str, user_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "DELETE FROM t_conversations WHERE id = ?1 AND user_id = ?2",
            rusqlite::params![id, user_id],
        )?;
        if rows_changed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Current comma-joined model set for a conversation.
    pub fn read_models(&self, id: &str) -> Result<String> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT model FROM t_conversations WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(models) => Ok(models),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(StoreError::NotFound { id: id.to_string() })
            }
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Overwrite the model set, bumping `update_time`.
    pub fn write_models(&self, id: &str, models: &str) -> Result<()> {
        self.update_header(id, None, Some(models))
    }
}

/// Apply the model-set update rule: split the stored string by comma,
/// trim entries, drop empties, append the incoming provider when absent,
/// and rejoin. Insertion order is preserved.
pub fn merge_model_set(existing: &str, provider: &str) -> String {
    let mut models: Vec<&str> = existing
        .split(',')
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .collect();
    let provider = provider.trim();
    if !provider.is_empty() && !models.contains(&provider) {
        models.push(provider);
    }
    models.join(",")
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        model: row.get(3)?,
        create_time: row.get(4)?,
        update_time: row.get(5)?,
    })
}
