//! 检查点存储后端
//!
//! CheckpointBackend 只负责存取；排序、时间戳单调与错误吞掉由 CheckpointStore 负责。

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::anyhow;

use crate::checkpoint::Checkpoint;

pub trait CheckpointBackend: Send + Sync {
    /// 按 id 插入或覆盖
    fn put(&self, checkpoint: &Checkpoint) -> anyhow::Result<()>;

    fn get(&self, id: &str) -> anyhow::Result<Option<Checkpoint>>;

    /// 某线程的全部检查点，顺序不限
    fn query_by_thread(&self, thread_id: &str) -> anyhow::Result<Vec<Checkpoint>>;

    fn delete(&self, id: &str) -> anyhow::Result<bool>;

    /// 返回删除条数
    fn delete_thread(&self, thread_id: &str) -> anyhow::Result<usize>;

    fn clear(&self) -> anyhow::Result<usize>;

    fn name(&self) -> &'static str;
}

/// 进程内存储（测试与单进程运行）
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("checkpoint lock poisoned")
}

impl CheckpointBackend for InMemoryBackend {
    fn put(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(checkpoint.id.clone(), checkpoint.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> anyhow::Result<Option<Checkpoint>> {
        Ok(self.entries.read().map_err(poisoned)?.get(id).cloned())
    }

    fn query_by_thread(&self, thread_id: &str) -> anyhow::Result<Vec<Checkpoint>> {
        Ok(self
            .entries
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|c| c.thread_id == thread_id)
            .cloned()
            .collect())
    }

    fn delete(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.entries.write().map_err(poisoned)?.remove(id).is_some())
    }

    fn delete_thread(&self, thread_id: &str) -> anyhow::Result<usize> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|_, c| c.thread_id != thread_id);
        Ok(before - entries.len())
    }

    fn clear(&self) -> anyhow::Result<usize> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let n = entries.len();
        entries.clear();
        Ok(n)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// 不保存任何内容；存储不可用时的降级后端
#[derive(Debug, Default)]
pub struct NoopBackend;

impl CheckpointBackend for NoopBackend {
    fn put(&self, _checkpoint: &Checkpoint) -> anyhow::Result<()> {
        Ok(())
    }

    fn get(&self, _id: &str) -> anyhow::Result<Option<Checkpoint>> {
        Ok(None)
    }

    fn query_by_thread(&self, _thread_id: &str) -> anyhow::Result<Vec<Checkpoint>> {
        Ok(Vec::new())
    }

    fn delete(&self, _id: &str) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn delete_thread(&self, _thread_id: &str) -> anyhow::Result<usize> {
        Ok(0)
    }

    fn clear(&self) -> anyhow::Result<usize> {
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
