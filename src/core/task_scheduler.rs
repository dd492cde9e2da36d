//! 工具并发调度
//!
//! ToolExecutor::execute_tools 扇出时，每个调用先取 Semaphore 许可，限制同时在途的工具数。

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// 任务调度器：工具执行并发上限（默认 3）
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    tool_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_tools: usize) -> Self {
        let max_concurrent = max_concurrent_tools.max(1);
        Self {
            tool_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// 获取工具执行许可，drop 即归还
    pub async fn acquire_tool(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.tool_semaphore.clone().acquire_owned().await
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// 当前空闲许可数
    pub fn available(&self) -> usize {
        self.tool_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_are_bounded() {
        let scheduler = TaskScheduler::new(2);
        let a = scheduler.acquire_tool().await.unwrap();
        let _b = scheduler.acquire_tool().await.unwrap();
        assert_eq!(scheduler.available(), 0);
        drop(a);
        assert_eq!(scheduler.available(), 1);
    }

    #[test]
    fn test_zero_is_clamped_to_one() {
        assert_eq!(TaskScheduler::new(0).max_concurrent(), 1);
    }
}
