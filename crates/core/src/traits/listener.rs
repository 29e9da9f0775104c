//! 事件监听接口
//!
//! 监听器可能阻塞在网络读取上，取消信号无法打断，因此调度器停止时
//! 会先单独调用 `stop()`。

use async_trait::async_trait;

use crate::SchedulerResult;

/// 长时间运行的事件监听器
#[async_trait]
pub trait Listener: Send + Sync {
    /// 开始监听，直到 `stop()` 被调用或连接结束才返回
    async fn listen(&self) -> SchedulerResult<()>;

    async fn stop(&self) -> SchedulerResult<()>;
}

/// 已缓冲事件的来源
///
/// `next_event` 不阻塞等待：当前没有事件时返回 `None`。
#[async_trait]
pub trait EventSource<T: Send + 'static>: Send + Sync {
    async fn next_event(&self) -> SchedulerResult<Option<T>>;
}
