use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BoefjeTask, NormalizerTask};
use crate::SchedulerResult;

/// 优先级队列中的条目
///
/// - `id`: 队列条目的唯一标识，同时也是对应 Task 记录的 id
/// - `hash`: 逻辑任务身份（插件 + 输入对象 + 组织），用于去重；为 `None` 的条目永远不会被持久化
/// - `priority`: 数值越小越紧急，越先出队
/// - `data`: 与任务类型相关的负载（BoefjeTask / NormalizerTask 的 JSON 表示）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrioritizedItem {
    pub id: Uuid,
    pub scheduler_id: String,
    pub hash: Option<String>,
    pub priority: i64,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl PrioritizedItem {
    pub fn new(
        scheduler_id: impl Into<String>,
        hash: Option<String>,
        priority: i64,
        data: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            scheduler_id: scheduler_id.into(),
            hash,
            priority,
            data,
            created_at: now,
            modified_at: now,
        }
    }

    /// 由具体任务构造条目，条目 id 与任务 id 保持一致便于查找
    pub fn from_task<T: Serialize>(
        scheduler_id: impl Into<String>,
        id: Uuid,
        hash: String,
        priority: i64,
        task: &T,
    ) -> SchedulerResult<Self> {
        let mut item = Self::new(scheduler_id, Some(hash), priority, serde_json::to_value(task)?);
        item.id = id;
        Ok(item)
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// 把负载解析回具体的任务类型
    pub fn decode<T: DeserializeOwned>(&self) -> SchedulerResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// 队列所承载的工作类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Boefje,
    Normalizer,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Boefje => "boefje",
            ItemKind::Normalizer => "normalizer",
        }
    }

    /// 校验负载能否解析为该类型的任务
    pub fn validate(&self, data: &serde_json::Value) -> Result<(), String> {
        let result = match self {
            ItemKind::Boefje => serde_json::from_value::<BoefjeTask>(data.clone()).map(|_| ()),
            ItemKind::Normalizer => {
                serde_json::from_value::<NormalizerTask>(data.clone()).map(|_| ())
            }
        };
        result.map_err(|e| format!("负载不是有效的 {} 任务: {e}", self.as_str()))
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "boefje" => Ok(ItemKind::Boefje),
            "normalizer" => Ok(ItemKind::Normalizer),
            _ => Err(format!("未知的任务类型: {s}")),
        }
    }
}
