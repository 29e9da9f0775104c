use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{options::*, types::FieldTable, Channel, Connection, ConnectionProperties};
use serde::de::DeserializeOwned;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use scheduler_core::{Listener, SchedulerError, SchedulerResult};

use super::MemoryEventSource;

/// 未设置时的未确认消息上限
pub const DEFAULT_PREFETCH_COUNT: u16 = 100;

/// AMQP 队列监听器
///
/// 消费到的消息反序列化后写入共享缓冲区，写入成功才确认；无法解析的消息
/// 记录日志后确认丢弃。缓冲区满时停止确认，broker 按 `prefetch_count`
/// 停止投递，剩余消息留在队列中。
pub struct AmqpListener<T> {
    url: String,
    queue: String,
    prefetch_count: u16,
    buffer: Arc<MemoryEventSource<T>>,
    channel: Mutex<Option<Channel>>,
    stop_tx: watch::Sender<bool>,
}

impl<T> AmqpListener<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(url: &str, queue: &str, buffer: Arc<MemoryEventSource<T>>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            url: url.to_string(),
            queue: queue.to_string(),
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            buffer,
            channel: Mutex::new(None),
            stop_tx,
        }
    }

    pub fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count.max(1);
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    async fn connect(&self) -> SchedulerResult<Channel> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建通道失败: {e}")))?;

        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("声明队列 {} 失败: {e}", self.queue))
            })?;

        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("设置prefetch失败: {e}")))?;

        Ok(channel)
    }
}

#[async_trait]
impl<T> Listener for AmqpListener<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    async fn listen(&self) -> SchedulerResult<()> {
        let mut stop_rx = self.stop_tx.subscribe();
        if *stop_rx.borrow() {
            return Ok(());
        }

        let channel = self.connect().await?;
        let mut consumer = channel
            .basic_consume(
                &self.queue,
                &format!("scheduler-{}", self.queue),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建消费者失败: {e}")))?;
        *self.channel.lock().await = Some(channel);

        info!(queue = %self.queue, "开始监听消息队列");

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                delivery = consumer.next() => {
                    let delivery = match delivery {
                        Some(Ok(delivery)) => delivery,
                        Some(Err(e)) => {
                            return Err(SchedulerError::MessageQueue(format!("消费消息失败: {e}")));
                        }
                        None => break,
                    };

                    match serde_json::from_slice::<T>(&delivery.data) {
                        Ok(event) => {
                            if self.buffer.is_full().await {
                                debug!(queue = %self.queue, "事件缓冲区已满，等待消费");
                            }
                            // 停止时消息不确认，由 broker 重新投递
                            tokio::select! {
                                _ = stop_rx.changed() => break,
                                _ = self.buffer.publish(event) => {}
                            }
                        }
                        Err(e) => warn!(queue = %self.queue, error = %e, "无法解析的消息，已丢弃"),
                    }

                    delivery
                        .ack(BasicAckOptions::default())
                        .await
                        .map_err(|e| SchedulerError::MessageQueue(format!("确认消息失败: {e}")))?;
                }
            }
        }

        debug!(queue = %self.queue, "消息队列监听结束");
        Ok(())
    }

    async fn stop(&self) -> SchedulerResult<()> {
        self.stop_tx.send_replace(true);

        if let Some(channel) = self.channel.lock().await.take() {
            channel
                .close(200, "正常关闭")
                .await
                .map_err(|e| SchedulerError::MessageQueue(format!("关闭通道失败: {e}")))?;
        }
        Ok(())
    }
}
