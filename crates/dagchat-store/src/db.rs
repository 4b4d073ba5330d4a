use rusqlite::Connection;

use crate::error::Result;

/// Initialise the conversation-header table and its index.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_metadata_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS t_conversations (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            title       TEXT NOT NULL DEFAULT '',
            model       TEXT NOT NULL DEFAULT '',
            create_time TEXT NOT NULL,
            update_time TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_user
            ON t_conversations(user_id, update_time DESC);",
    )?;
    Ok(())
}

/// Initialise the message-node collection.
///
/// The table is document-shaped: `parent_ids` and `children` are JSON
/// arrays, and the only access paths are primary-key batch lookup and a
/// per-conversation scan.
pub fn init_nodes_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS message_node (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            role            TEXT NOT NULL,
            content         TEXT NOT NULL,
            reasoning       TEXT,
            model           TEXT,
            parent_ids      TEXT NOT NULL DEFAULT '[]',
            children        TEXT NOT NULL DEFAULT '[]',
            create_time     TEXT NOT NULL,
            update_time     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_message_node_conversation
            ON message_node(conversation_id, create_time);",
    )?;
    Ok(())
}
