//! SQLite-backed conversation and document store
//!
//! The external stage processes open the same database file, so the
//! connection runs in WAL mode with a busy timeout.

use std::path::Path;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use super::messages::{StateError, StateResponse};
use crate::dialog::DialogState;
use crate::domain::{ConversationRef, ConversationState, Document, Metadata, NewDocument, now_ms};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL,
    title       TEXT,
    state       TEXT,
    metadata    TEXT NOT NULL DEFAULT '{}',
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations (user_id);

CREATE TABLE IF NOT EXISTS documents (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id      INTEGER NOT NULL,
    name         TEXT NOT NULL,
    path         TEXT NOT NULL,
    course_name  TEXT,
    uploaded_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_user ON documents (user_id, uploaded_at);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable conversation state and document catalog
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> StateResponse<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Store::open: called");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StateError::StoreError(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::init(conn)
    }

    /// Private in-memory database, used by tests and dry runs
    pub fn open_in_memory() -> StateResponse<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StateResponse<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn create_conversation(&mut self, user_id: i64, title: Option<&str>) -> StateResponse<i64> {
        let now = now_ms();
        self.conn.execute(
            "INSERT INTO conversations (user_id, title, state, metadata, created_at, updated_at)
             VALUES (?1, ?2, NULL, '{}', ?3, ?3)",
            params![user_id, title, now],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(user_id, id, "create_conversation: inserted");
        Ok(id)
    }

    /// `None` when the conversation row does not exist
    pub fn get_conversation(&self, conversation: ConversationRef) -> StateResponse<Option<ConversationState>> {
        let raw = self
            .conn
            .query_row(
                "SELECT state, metadata FROM conversations WHERE id = ?1 AND user_id = ?2",
                params![conversation.conversation_id, conversation.user_id],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;

        raw.map(|(state, metadata)| decode_conversation(state, metadata))
            .transpose()
    }

    /// Set the state and shallow-merge `patch` into the stored metadata
    pub fn set_conversation(
        &mut self,
        conversation: ConversationRef,
        state: DialogState,
        patch: &Metadata,
    ) -> StateResponse<ConversationState> {
        let tx = self.conn.transaction()?;

        let stored = tx
            .query_row(
                "SELECT state, metadata FROM conversations WHERE id = ?1 AND user_id = ?2",
                params![conversation.conversation_id, conversation.user_id],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?
            .ok_or_else(|| StateError::NotFound(format!("conversation {}", conversation)))?;

        let current = decode_conversation(stored.0, stored.1)?;
        let updated = ConversationState {
            state: Some(state),
            metadata: current.merged_metadata(patch),
        };

        tx.execute(
            "UPDATE conversations SET state = ?1, metadata = ?2, updated_at = ?3
             WHERE id = ?4 AND user_id = ?5",
            params![
                state.as_str(),
                serde_json::to_string(&updated.metadata)?,
                now_ms(),
                conversation.conversation_id,
                conversation.user_id
            ],
        )?;
        tx.commit()?;

        debug!(%conversation, %state, patched = patch.len(), "set_conversation: updated");
        Ok(updated)
    }

    pub fn add_document(&mut self, document: &NewDocument) -> StateResponse<i64> {
        let uploaded_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.conn.execute(
            "INSERT INTO documents (user_id, name, path, course_name, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                document.user_id,
                document.name,
                document.path,
                document.course_name,
                uploaded_at
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(user_id = document.user_id, id, name = %document.name, "add_document: inserted");
        Ok(id)
    }

    /// Document `id`, only if it belongs to `user_id`
    pub fn get_document(&self, user_id: i64, id: i64) -> StateResponse<Option<Document>> {
        let document = self
            .conn
            .query_row(
                "SELECT id, user_id, name, path, course_name, uploaded_at
                 FROM documents WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                document_from_row,
            )
            .optional()?;
        Ok(document)
    }

    /// Most recent upload of `user_id`
    pub fn latest_document(&self, user_id: i64) -> StateResponse<Option<Document>> {
        let document = self
            .conn
            .query_row(
                "SELECT id, user_id, name, path, course_name, uploaded_at
                 FROM documents WHERE user_id = ?1
                 ORDER BY uploaded_at DESC, id DESC LIMIT 1",
                params![user_id],
                document_from_row,
            )
            .optional()?;
        Ok(document)
    }
}

fn decode_conversation(state: Option<String>, metadata: Option<String>) -> StateResponse<ConversationState> {
    let state = state
        .map(|s| s.parse::<DialogState>().map_err(StateError::DeserializationError))
        .transpose()?;
    let metadata = match metadata.as_deref().map(str::trim) {
        None | Some("") => Metadata::new(),
        Some(raw) => serde_json::from_str(raw)?,
    };
    Ok(ConversationState { state, metadata })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        path: row.get(3)?,
        course_name: row.get(4)?,
        uploaded_at: row.get(5)?,
    })
}
