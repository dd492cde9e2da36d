//! 检查点：AgentState 的可恢复快照
//!
//! CheckpointStore 包装任意 CheckpointBackend：
//! - 同一 store 内时间戳严格递增，list 按 (timestamp, id) 倒序
//! - 后端出错只记日志：save 始终返回快照，读取返回空
//! - SQLite 打不开时降级为 NoopBackend

pub mod backend;
pub mod sqlite;

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentState;

pub use backend::{CheckpointBackend, InMemoryBackend, NoopBackend};
pub use sqlite::SqliteBackend;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub thread_id: String,
    pub agent_id: String,
    pub state: AgentState,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

pub struct CheckpointStore {
    backend: Arc<dyn CheckpointBackend>,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
}

impl CheckpointStore {
    pub fn new(backend: Arc<dyn CheckpointBackend>) -> Self {
        Self {
            backend,
            last_timestamp: Mutex::new(None),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopBackend))
    }

    /// 打开 SQLite；失败时告警并降级为不保存
    pub fn open_sqlite(path: impl AsRef<Path>) -> Self {
        match SqliteBackend::open(path.as_ref()) {
            Ok(backend) => Self::new(Arc::new(backend)),
            Err(e) => {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    error = %e,
                    "checkpoint storage unavailable, checkpoints will not be persisted"
                );
                Self::noop()
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// 严格递增的时间戳，精度为微秒（与 SQLite 存储一致）；同一微秒内多次保存时顺延 1µs
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        match self.last_timestamp.lock() {
            Ok(mut last) => {
                let ts = match *last {
                    Some(prev) if now <= prev => prev + Duration::microseconds(1),
                    _ => now,
                };
                *last = Some(ts);
                ts
            }
            Err(_) => now,
        }
    }

    /// 新建快照；存储失败时仍返回快照
    pub fn save(&self, thread_id: &str, agent_id: &str, state: &AgentState, metadata: Value) -> Checkpoint {
        let checkpoint = Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            agent_id: agent_id.to_string(),
            state: state.clone(),
            timestamp: self.next_timestamp(),
            metadata,
        };
        self.upsert(&checkpoint);
        checkpoint
    }

    /// 按 id 写入，重复写入同一快照是幂等的
    pub fn upsert(&self, checkpoint: &Checkpoint) {
        match self.backend.put(checkpoint) {
            Ok(()) => tracing::debug!(
                id = %checkpoint.id,
                thread = %checkpoint.thread_id,
                status = ?checkpoint.state.status,
                "checkpoint saved"
            ),
            Err(e) => tracing::warn!(id = %checkpoint.id, error = %e, "checkpoint save failed"),
        }
    }

    pub fn get(&self, id: &str) -> Option<Checkpoint> {
        self.backend.get(id).unwrap_or_else(|e| {
            tracing::warn!(id, error = %e, "checkpoint read failed");
            None
        })
    }

    /// 某线程的快照，最新在前
    pub fn list(&self, thread_id: &str) -> Vec<Checkpoint> {
        let mut checkpoints = self.backend.query_by_thread(thread_id).unwrap_or_else(|e| {
            tracing::warn!(thread = thread_id, error = %e, "checkpoint query failed");
            Vec::new()
        });
        checkpoints.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        checkpoints
    }

    pub fn get_latest(&self, thread_id: &str) -> Option<Checkpoint> {
        self.list(thread_id).into_iter().next()
    }

    pub fn delete(&self, id: &str) -> bool {
        self.backend.delete(id).unwrap_or_else(|e| {
            tracing::warn!(id, error = %e, "checkpoint delete failed");
            false
        })
    }

    /// 清空一个线程或全部；返回删除条数
    pub fn clear(&self, thread_id: Option<&str>) -> usize {
        let result = match thread_id {
            Some(thread) => self.backend.delete_thread(thread),
            None => self.backend.clear(),
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "checkpoint clear failed");
            0
        })
    }
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
