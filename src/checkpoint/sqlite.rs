//! SQLite 检查点后端（rusqlite，同步连接）
//!
//! 表 checkpoints(id, thread_id, agent_id, state, metadata, timestamp)；state / metadata 为 JSON 文本，
//! timestamp 为 UTC 微秒，(thread_id, timestamp) 上建索引。

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use chrono::DateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::checkpoint::{Checkpoint, CheckpointBackend};

pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create checkpoint dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open checkpoint database {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                state TEXT NOT NULL,
                metadata TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_checkpoints_thread
                ON checkpoints(thread_id, timestamp DESC);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("checkpoint connection lock poisoned"))
    }
}

/// 原始行；JSON 解码放在 rusqlite 回调之外
struct RawRow {
    id: String,
    thread_id: String,
    agent_id: String,
    state: String,
    metadata: String,
    timestamp: i64,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            agent_id: row.get(2)?,
            state: row.get(3)?,
            metadata: row.get(4)?,
            timestamp: row.get(5)?,
        })
    }

    fn decode(self) -> anyhow::Result<Checkpoint> {
        Ok(Checkpoint {
            state: serde_json::from_str(&self.state)
                .with_context(|| format!("decode state of checkpoint {}", self.id))?,
            metadata: serde_json::from_str(&self.metadata)?,
            timestamp: DateTime::from_timestamp_micros(self.timestamp)
                .ok_or_else(|| anyhow!("bad timestamp {} in checkpoint {}", self.timestamp, self.id))?,
            id: self.id,
            thread_id: self.thread_id,
            agent_id: self.agent_id,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, thread_id, agent_id, state, metadata, timestamp FROM checkpoints";

impl CheckpointBackend for SqliteBackend {
    fn put(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        let state = serde_json::to_string(&checkpoint.state)?;
        let metadata = serde_json::to_string(&checkpoint.metadata)?;
        self.lock()?.execute(
            "INSERT OR REPLACE INTO checkpoints (id, thread_id, agent_id, state, metadata, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                checkpoint.id,
                checkpoint.thread_id,
                checkpoint.agent_id,
                state,
                metadata,
                checkpoint.timestamp.timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> anyhow::Result<Option<Checkpoint>> {
        let raw = self
            .lock()?
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                RawRow::from_row,
            )
            .optional()?;
        raw.map(RawRow::decode).transpose()
    }

    fn query_by_thread(&self, thread_id: &str) -> anyhow::Result<Vec<Checkpoint>> {
        let raws = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE thread_id = ?1 ORDER BY timestamp DESC"
            ))?;
            let rows = stmt.query_map(params![thread_id], RawRow::from_row)?;
            let raws = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            raws
        };
        raws.into_iter().map(RawRow::decode).collect()
    }

    fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let n = self
            .lock()?
            .execute("DELETE FROM checkpoints WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    fn delete_thread(&self, thread_id: &str) -> anyhow::Result<usize> {
        Ok(self
            .lock()?
            .execute("DELETE FROM checkpoints WHERE thread_id = ?1", params![thread_id])?)
    }

    fn clear(&self) -> anyhow::Result<usize> {
        Ok(self.lock()?.execute("DELETE FROM checkpoints", [])?)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
