//! 调度系统基础设施
//!
//! - `queue`: 带去重的内存优先级队列
//! - `storage`: 任务与作业存储（内存 / SQLite）
//! - `connectors`: 对象图、插件目录、原始数据服务的 HTTP 客户端
//! - `listeners`: 事件缓冲区与 AMQP 监听器
//! - `observability`: Prometheus 指标

pub mod connectors;
pub mod listeners;
pub mod observability;
pub mod queue;
pub mod storage;

pub use connectors::{BytesClient, KatalogusClient, OctopoesClient};
pub use listeners::{AmqpListener, MemoryEventSource};
pub use observability::{init_metrics, MetricsCollector};
pub use queue::{PriorityQueue, QueueStatus};
pub use storage::{create_stores, InMemoryStore, SqliteStore};
