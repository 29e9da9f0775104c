use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::scheduler::{SchedulerStatus, SchedulingStrategy};

/// 按调度器 id 管理的一组调度器
#[derive(Default)]
pub struct SchedulerSet {
    schedulers: RwLock<HashMap<String, Arc<dyn SchedulingStrategy>>>,
}

impl SchedulerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入并启动调度器；同 id 已存在时不做任何事并返回 false
    pub async fn add(&self, strategy: Arc<dyn SchedulingStrategy>) -> bool {
        let id = strategy.scheduler_id().to_string();
        {
            let mut schedulers = self.schedulers.write().await;
            if schedulers.contains_key(&id) {
                warn!(scheduler_id = %id, "调度器已存在");
                return false;
            }
            schedulers.insert(id.clone(), Arc::clone(&strategy));
        }

        strategy.run();
        info!(scheduler_id = %id, "调度器已启动");
        true
    }

    /// 移除并停止调度器
    pub async fn remove(&self, scheduler_id: &str) -> Option<Arc<dyn SchedulingStrategy>> {
        let strategy = self.schedulers.write().await.remove(scheduler_id)?;
        strategy.stop().await;
        info!(scheduler_id, "调度器已移除");
        Some(strategy)
    }

    /// 只从集合中移除，不调用 stop（调度器已自行停止时使用）
    pub async fn forget(&self, scheduler_id: &str) -> Option<Arc<dyn SchedulingStrategy>> {
        self.schedulers.write().await.remove(scheduler_id)
    }

    pub async fn get(&self, scheduler_id: &str) -> Option<Arc<dyn SchedulingStrategy>> {
        self.schedulers.read().await.get(scheduler_id).cloned()
    }

    pub async fn contains(&self, scheduler_id: &str) -> bool {
        self.schedulers.read().await.contains_key(scheduler_id)
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.schedulers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.schedulers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.schedulers.read().await.is_empty()
    }

    /// 按 id 排序的状态快照
    pub async fn statuses(&self) -> Vec<SchedulerStatus> {
        let mut statuses: Vec<SchedulerStatus> = self
            .schedulers
            .read()
            .await
            .values()
            .map(|s| s.status())
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    pub async fn stop_all(&self) {
        let schedulers: Vec<Arc<dyn SchedulingStrategy>> =
            self.schedulers.write().await.drain().map(|(_, s)| s).collect();

        for strategy in schedulers {
            strategy.stop().await;
        }
    }
}
