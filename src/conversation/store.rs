// src/conversation/store.rs
// SQLite-backed persistence for conversations, messages, and workflow
// checkpoints. One shared pool, WAL journal mode, a busy timeout long
// enough to ride out a concurrent writer — the same shape as the
// teacher's checkpoint and session-cache stores, tuned for a service that
// many threads hit concurrently instead of a single local CLI session.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::{Conversation, Message, Role, WorkflowState};

pub struct ConversationStore {
    pool: SqlitePool,
    /// Per-thread locks so two requests for the same conversation id never
    /// interleave their reads/writes of the checkpoint row.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConversationStore {
    pub async fn connect(database_url: &str, max_connections: u32, busy_timeout_ms: u64) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("failed to open conversation store database")?;

        let store = Self { pool, locks: DashMap::new() };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_checkpoints (
                conversation_id TEXT PRIMARY KEY,
                state_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Acquire the per-conversation lock for the lifetime of a request.
    /// Held across the whole workflow run so a second request for the same
    /// thread queues behind it rather than racing its checkpoint write.
    pub async fn lock_thread(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    async fn ensure_conversation(&self, conversation_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO conversations (id, created_at, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at
            "#,
        )
        .bind(conversation_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("failed to upsert conversation row")?;
        Ok(())
    }

    pub async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        self.ensure_conversation(conversation_id).await?;

        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to append message")?;

        Ok(message)
    }

    /// Most recent `limit` messages for a thread, oldest first.
    pub async fn list_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, role, content, created_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("failed to list messages")?;

        let mut messages: Vec<Message> = rows
            .into_iter()
            .filter_map(|row| {
                let role_str: String = row.get("role");
                let role = Role::from_str(&role_str)?;
                Some(Message {
                    id: row.get("id"),
                    conversation_id: row.get("conversation_id"),
                    role,
                    content: row.get("content"),
                    created_at: row
                        .get::<String, _>("created_at")
                        .parse()
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .collect();
        messages.reverse();
        Ok(messages)
    }

    pub async fn get_checkpoint(&self, conversation_id: &str) -> Result<Option<WorkflowState>> {
        let row = sqlx::query(
            "SELECT state_json FROM workflow_checkpoints WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load checkpoint")?;

        match row {
            Some(row) => {
                let state_json: String = row.get("state_json");
                let state = serde_json::from_str(&state_json)
                    .context("failed to deserialize workflow checkpoint")?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Persist a checkpoint. Only called on clean completion of a workflow
    /// run, never on cancellation or error.
    pub async fn put_checkpoint(&self, state: &WorkflowState) -> Result<()> {
        self.ensure_conversation(&state.conversation_id).await?;

        let state_json = serde_json::to_string(state)
            .context("failed to serialize workflow checkpoint")?;

        sqlx::query(
            r#"
            INSERT INTO workflow_checkpoints (conversation_id, state_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(conversation_id) DO UPDATE SET
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.conversation_id)
        .bind(&state_json)
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to persist workflow checkpoint")?;

        Ok(())
    }

    pub async fn list_threads(&self, limit: usize) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            "SELECT id, created_at, updated_at FROM conversations ORDER BY updated_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("failed to list threads")?;

        Ok(rows
            .into_iter()
            .map(|row| Conversation {
                id: row.get("id"),
                created_at: row
                    .get::<String, _>("created_at")
                    .parse()
                    .unwrap_or_else(|_| Utc::now()),
                updated_at: row
                    .get::<String, _>("updated_at")
                    .parse()
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }

    pub async fn delete_thread(&self, conversation_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM workflow_checkpoints WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        self.locks.remove(conversation_id);
        Ok(())
    }

    /// Delete threads whose last activity is older than `max_age`. Returns
    /// the number of threads actually removed. Per spec.md §4.3, a failure
    /// deleting one thread is logged and skipped rather than aborting the
    /// whole sweep — a single locked or corrupt row must not stop the
    /// cleaner from reclaiming everything else.
    pub async fn cleanup_older_than(&self, max_age: chrono::Duration) -> Result<u64> {
        let cutoff = (Utc::now() - max_age).to_rfc3339();

        let stale: Vec<String> = sqlx::query(
            "SELECT id FROM conversations WHERE updated_at < ?",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await
        .context("failed to find stale threads")?
        .into_iter()
        .map(|row| row.get::<String, _>("id"))
        .collect();

        let mut removed = 0u64;
        for id in &stale {
            match self.delete_thread(id).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("failed to delete stale thread {id}: {e}"),
            }
        }

        if removed > 0 {
            debug!("cleaned up {removed} stale conversation threads");
        }

        Ok(removed)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> ConversationStore {
        ConversationStore::connect("sqlite::memory:", 1, 5000)
            .await
            .expect("failed to create in-memory store")
    }

    #[tokio::test]
    async fn append_and_list_messages_preserves_order() {
        let store = test_store().await;
        store.append_message("t1", Role::User, "hello").await.unwrap();
        store.append_message("t1", Role::Assistant, "hi there").await.unwrap();

        let messages = store.list_messages("t1", 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].content, "hi there");
    }

    #[tokio::test]
    async fn checkpoint_round_trips() {
        let store = test_store().await;
        let state = WorkflowState::new("t1", 5);
        store.put_checkpoint(&state).await.unwrap();

        let loaded = store.get_checkpoint("t1").await.unwrap().unwrap();
        assert_eq!(loaded.conversation_id, "t1");
        assert!(loaded.last_route.is_none());
    }

    #[tokio::test]
    async fn missing_checkpoint_is_none() {
        let store = test_store().await;
        assert!(store.get_checkpoint("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_thread_removes_messages_and_checkpoint() {
        let store = test_store().await;
        store.append_message("t1", Role::User, "hello").await.unwrap();
        store.put_checkpoint(&WorkflowState::new("t1", 5)).await.unwrap();

        store.delete_thread("t1").await.unwrap();

        assert!(store.list_messages("t1", 10).await.unwrap().is_empty());
        assert!(store.get_checkpoint("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_older_than_removes_stale_threads_only() {
        let store = test_store().await;
        store.append_message("old", Role::User, "hi").await.unwrap();
        store.append_message("fresh", Role::User, "hi").await.unwrap();

        // Force "old" out of the cleanup window.
        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = 'old'")
            .bind((Utc::now() - chrono::Duration::days(10)).to_rfc3339())
            .execute(store.pool())
            .await
            .unwrap();

        let removed = store.cleanup_older_than(chrono::Duration::days(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.list_threads(10).await.unwrap().iter().all(|c| c.id != "old"));
        assert!(store.list_threads(10).await.unwrap().iter().any(|c| c.id == "fresh"));
    }
}
