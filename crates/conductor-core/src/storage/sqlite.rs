use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;

use super::{push_exchange, Storage};
use crate::context::SessionMeta;
use crate::history::MessageHistory;

/// Conversation history in a SQLite database, one row per session.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create the conversation database.
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database '{}'", db_path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL UNIQUE,
                customer_id TEXT NOT NULL,
                user_message TEXT,
                assistant_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_customer ON conversations(customer_id);",
        )
        .context("failed to create tables")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {e}"))
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get_conversations(
        &self,
        meta: &SessionMeta,
        limit: usize,
        offset: usize,
    ) -> Result<MessageHistory> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_message, assistant_message
             FROM conversations
             WHERE customer_id = ?1
             ORDER BY id DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let mut rows: Vec<(Option<String>, Option<String>)> = stmt
            .query_map(
                rusqlite::params![meta.customer_id, limit as i64, offset as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to query conversations")?;
        rows.reverse();

        let mut history = MessageHistory::new();
        for (user, assistant) in rows {
            push_exchange(&mut history, user, assistant);
        }
        Ok(history)
    }

    async fn create_conversation(&self, meta: &SessionMeta, user_text: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.lock_conn()?
            .execute(
                "INSERT INTO conversations (session_id, customer_id, user_message, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![meta.session_id, meta.customer_id, user_text, now],
            )
            .context("failed to create conversation")?;
        Ok(())
    }

    async fn finish_conversation(&self, meta: &SessionMeta, assistant_text: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let updated = self
            .lock_conn()?
            .execute(
                "UPDATE conversations SET assistant_message = ?1, updated_at = ?2
                 WHERE session_id = ?3",
                rusqlite::params![assistant_text, now, meta.session_id],
            )
            .context("failed to update conversation with assistant message")?;
        if updated == 0 {
            anyhow::bail!("no conversation found with session_id: {}", meta.session_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(history: &MessageHistory) -> Vec<String> {
        history.iter().map(|m| m.content.clone()).collect()
    }

    #[tokio::test]
    async fn history_is_chronological_with_offset_from_end() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::new(&dir.path().join("db").join("conversations.db")).unwrap();
        for n in 1..=4 {
            let meta = SessionMeta::new("cust");
            storage.create_conversation(&meta, &format!("q{n}")).await.unwrap();
            storage.finish_conversation(&meta, &format!("a{n}")).await.unwrap();
        }
        let meta = SessionMeta::new("cust");

        let latest = storage.get_conversations(&meta, 2, 0).await.unwrap();
        assert_eq!(contents(&latest), ["q3", "a3", "q4", "a4"]);

        let earlier = storage.get_conversations(&meta, 1, 2).await.unwrap();
        assert_eq!(contents(&earlier), ["q2", "a2"]);
    }

    #[tokio::test]
    async fn reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.db");
        let meta = SessionMeta::new("cust");
        {
            let storage = SqliteStorage::new(&path).unwrap();
            storage.create_conversation(&meta, "hello").await.unwrap();
        }
        let storage = SqliteStorage::new(&path).unwrap();
        let history = storage.get_conversations(&meta, 5, 0).await.unwrap();
        assert_eq!(contents(&history), ["hello"]);
    }

    #[tokio::test]
    async fn duplicate_session_and_unknown_finish_fail() {
        let storage = SqliteStorage::in_memory().unwrap();
        let meta = SessionMeta::new("cust");
        storage.create_conversation(&meta, "one").await.unwrap();
        assert!(storage.create_conversation(&meta, "two").await.is_err());
        assert!(storage
            .finish_conversation(&SessionMeta::new("cust"), "x")
            .await
            .is_err());
    }
}
