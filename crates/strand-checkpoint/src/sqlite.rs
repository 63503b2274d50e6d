use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use strand_core::error::{CheckpointError, Result, StrandError};

use crate::store::CheckpointStore;
use crate::types::Checkpoint;

/// One row per thread, JSON-encoded list and state columns.
///
/// The connection sits behind a std `Mutex`; queries run on the blocking pool.
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

fn storage(context: &str, e: impl std::fmt::Display) -> StrandError {
    CheckpointError::Storage(format!("{context}: {e}")).into()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| CheckpointError::Serialization(e.to_string()).into())
}

impl SqliteCheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| storage("failed to open database", e))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| storage("failed to open in-memory db", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_table()?;
        Ok(store)
    }

    fn create_table(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS thread_checkpoints (
                thread_id TEXT PRIMARY KEY NOT NULL,
                next TEXT NOT NULL,
                visited_nodes TEXT NOT NULL,
                message_count INTEGER NOT NULL,
                state TEXT NOT NULL,
                step INTEGER NOT NULL,
                completed INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .map_err(|e| storage("failed to create table", e))?;
        Ok(())
    }
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
    let thread_id: String = row.get(0)?;
    let next_json: String = row.get(1)?;
    let visited_json: String = row.get(2)?;
    let message_count: i64 = row.get(3)?;
    let state_json: String = row.get(4)?;
    let step: i64 = row.get(5)?;
    let completed: bool = row.get(6)?;
    let updated_at_str: String = row.get(7)?;

    let next: Vec<String> = serde_json::from_str(&next_json).unwrap_or_default();
    let visited_nodes: Vec<String> = serde_json::from_str(&visited_json).unwrap_or_default();
    let state: Value = serde_json::from_str(&state_json).unwrap_or(Value::Null);
    let updated_at: DateTime<Utc> = updated_at_str.parse().unwrap_or_else(|_| Utc::now());

    Ok(Checkpoint {
        thread_id,
        next,
        visited_nodes,
        message_count: message_count.max(0) as u64,
        state,
        step: step.max(0) as usize,
        completed,
        updated_at,
    })
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let next_json = to_json(&checkpoint.next)?;
            let visited_json = to_json(&checkpoint.visited_nodes)?;
            let state_json = to_json(&checkpoint.state)?;

            conn.execute(
                "INSERT OR REPLACE INTO thread_checkpoints
                    (thread_id, next, visited_nodes, message_count, state, step, completed, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    checkpoint.thread_id,
                    next_json,
                    visited_json,
                    checkpoint.message_count as i64,
                    state_json,
                    checkpoint.step as i64,
                    checkpoint.completed,
                    checkpoint.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| storage("insert checkpoint", e))?;

            Ok(())
        })
        .await
        .map_err(|e| storage("spawn_blocking", e))?
    }

    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let conn = Arc::clone(&self.conn);
        let thread_id = thread_id.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let mut stmt = conn
                .prepare(
                    "SELECT thread_id, next, visited_nodes, message_count, state, step, completed, updated_at
                     FROM thread_checkpoints
                     WHERE thread_id = ?1",
                )
                .map_err(|e| storage("prepare", e))?;

            let result = stmt
                .query_row(params![thread_id], row_to_checkpoint)
                .optional()
                .map_err(|e| storage("query", e))?;

            Ok(result)
        })
        .await
        .map_err(|e| storage("spawn_blocking", e))?
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let thread_id = thread_id.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            conn.execute(
                "DELETE FROM thread_checkpoints WHERE thread_id = ?1",
                params![thread_id],
            )
            .map_err(|e| storage("delete thread", e))?;
            Ok(())
        })
        .await
        .map_err(|e| storage("spawn_blocking", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_checkpoint(thread_id: &str, visited: &[&str]) -> Checkpoint {
        let mut cp = Checkpoint::new(thread_id);
        for node in visited {
            cp.record_node(node);
        }
        cp.message_count = visited.len() as u64 * 2;
        cp.state = json!({"visited": visited.len()});
        cp
    }

    #[tokio::test]
    async fn put_and_get() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        let cp = make_checkpoint("t-1", &["agent", "tools"]);
        store.put(cp.clone()).await.unwrap();

        let got = store.get("t-1").await.unwrap().unwrap();
        assert_eq!(got.visited_nodes, cp.visited_nodes);
        assert_eq!(got.message_count, 4);
        assert_eq!(got.state, json!({"visited": 2}));
        assert_eq!(got.step, 2);
        assert!(!got.completed);
    }

    #[tokio::test]
    async fn get_nonexistent() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_replaces_row() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.put(make_checkpoint("t-1", &["agent"])).await.unwrap();

        let mut cp = make_checkpoint("t-1", &["agent", "tools"]);
        cp.mark_completed();
        store.put(cp).await.unwrap();

        let got = store.get("t-1").await.unwrap().unwrap();
        assert_eq!(got.visited_nodes, vec!["agent", "tools"]);
        assert!(got.completed);
    }

    #[tokio::test]
    async fn delete_thread() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.put(make_checkpoint("t-1", &["agent"])).await.unwrap();
        store.delete("t-1").await.unwrap();
        assert!(store.get("t-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");

        {
            let store = SqliteCheckpointStore::new(&path).unwrap();
            store.put(make_checkpoint("t-1", &["agent"])).await.unwrap();
        }

        let store = SqliteCheckpointStore::new(&path).unwrap();
        let got = store.get("t-1").await.unwrap().unwrap();
        assert_eq!(got.visited_nodes, vec!["agent"]);
    }
}
