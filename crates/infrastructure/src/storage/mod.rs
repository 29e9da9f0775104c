//! 任务与作业存储实现
//!
//! - `InMemoryStore`: 进程内存储，用于测试和无数据库部署
//! - `SqliteStore`: 基于 `sqlx` 的 SQLite 存储

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use scheduler_core::config::DatabaseConfig;
use scheduler_core::{JobStore, SchedulerResult, TaskStore};

/// 按配置创建存储，返回同一实例的两个接口视图
pub async fn create_stores(
    config: &DatabaseConfig,
) -> SchedulerResult<(Arc<dyn TaskStore>, Arc<dyn JobStore>)> {
    if config.is_memory() {
        let store = Arc::new(InMemoryStore::new());
        return Ok((store.clone(), store));
    }

    let store = Arc::new(SqliteStore::connect(&config.url, config.max_connections).await?);
    Ok((store.clone(), store))
}
