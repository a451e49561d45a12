//! 任务调度：工具并发池
//!
//! 同一轮内的多个工具调用并发执行，用 Semaphore 限制同时在途的调用数。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 任务调度器
pub struct TaskScheduler {
    /// 工具并发限制（默认 6）
    tool_semaphore: Arc<Semaphore>,
    limit: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_tools: usize) -> Self {
        let limit = max_concurrent_tools.max(1);
        Self {
            tool_semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// 获取工具执行许可；信号量被关闭时返回 None
    pub async fn acquire_tool(&self) -> Option<OwnedSemaphorePermit> {
        self.tool_semaphore.clone().acquire_owned().await.ok()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 当前空闲许可数
    pub fn available(&self) -> usize {
        self.tool_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(6)
    }
}
