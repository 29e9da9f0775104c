use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use scheduler_core::{EventSource, SchedulerResult};

/// 进程内事件缓冲区（先进先出）
///
/// 设置容量后，缓冲区满时 `publish` 会等待消费腾出空间，
/// 上游监听器因此停止从消息队列取消息。
#[derive(Debug)]
pub struct MemoryEventSource<T> {
    events: Mutex<VecDeque<T>>,
    capacity: Option<usize>,
    space: Notify,
}

impl<T> Default for MemoryEventSource<T> {
    fn default() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: None,
            space: Notify::new(),
        }
    }
}

impl<T> MemoryEventSource<T> {
    /// 不限容量
    pub fn new() -> Self {
        Self::default()
    }

    /// 容量为 0 时视为 1
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: Some(capacity.max(1)),
            space: Notify::new(),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// 追加事件；缓冲区满时等待空间
    pub async fn publish(&self, event: T) {
        loop {
            let space = self.space.notified();
            {
                let mut events = self.events.lock().await;
                if self.has_room(events.len()) {
                    events.push_back(event);
                    return;
                }
            }
            space.await;
        }
    }

    /// 不等待的追加；缓冲区满时把事件原样返回
    pub async fn try_publish(&self, event: T) -> Result<(), T> {
        let mut events = self.events.lock().await;
        if !self.has_room(events.len()) {
            return Err(event);
        }
        events.push_back(event);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }

    pub async fn is_full(&self) -> bool {
        let len = self.events.lock().await.len();
        !self.has_room(len)
    }

    fn has_room(&self, len: usize) -> bool {
        self.capacity.map_or(true, |capacity| len < capacity)
    }
}

#[async_trait]
impl<T: Send + 'static> EventSource<T> for MemoryEventSource<T> {
    async fn next_event(&self) -> SchedulerResult<Option<T>> {
        let event = self.events.lock().await.pop_front();
        if event.is_some() {
            self.space.notify_waiters();
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_events_are_fifo() {
        let source = MemoryEventSource::new();
        source.publish(1).await;
        source.publish(2).await;
        assert_eq!(source.len().await, 2);

        assert_eq!(source.next_event().await.unwrap(), Some(1));
        assert_eq!(source.next_event().await.unwrap(), Some(2));
        assert_eq!(source.next_event().await.unwrap(), None);
        assert!(source.is_empty().await);
    }

    #[tokio::test]
    async fn test_full_buffer_rejects_try_publish() {
        let source = MemoryEventSource::with_capacity(2);
        source.try_publish(1).await.unwrap();
        source.try_publish(2).await.unwrap();

        assert!(source.is_full().await);
        assert_eq!(source.try_publish(3).await, Err(3));
        assert_eq!(source.len().await, 2);
    }

    #[tokio::test]
    async fn test_publish_waits_until_event_is_consumed() {
        let source = Arc::new(MemoryEventSource::with_capacity(1));
        source.publish(1).await;

        let producer = {
            let source = Arc::clone(&source);
            tokio::spawn(async move { source.publish(2).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!producer.is_finished());
        assert_eq!(source.len().await, 1);

        assert_eq!(source.next_event().await.unwrap(), Some(1));
        tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source.next_event().await.unwrap(), Some(2));
    }
}
