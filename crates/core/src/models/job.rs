use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PrioritizedItem;

/// 周期性作业
///
/// 以内容哈希标识的逻辑工作单元。每个 `(scheduler_id, hash)` 至多一条。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub scheduler_id: String,
    pub hash: String,
    pub enabled: bool,
    pub item: PrioritizedItem,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// 调度器最近一次评估该作业的时间
    pub checked_at: DateTime<Utc>,
}

impl Job {
    /// 以给定哈希为条目新建一个启用的作业
    pub fn new(hash: impl Into<String>, item: &PrioritizedItem) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            scheduler_id: item.scheduler_id.clone(),
            hash: hash.into(),
            enabled: true,
            item: item.clone(),
            created_at: now,
            modified_at: now,
            checked_at: now,
        }
    }

    /// 为条目新建一个启用的作业；条目没有哈希时返回 `None`
    pub fn from_item(item: &PrioritizedItem) -> Option<Self> {
        let hash = item.hash.clone()?;
        Some(Self::new(hash, item))
    }

    pub fn mark_checked(&mut self) {
        self.checked_at = Utc::now();
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        self.modified_at = Utc::now();
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.modified_at = Utc::now();
    }
}
