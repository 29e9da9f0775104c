use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ItemKind, PrioritizedItem};

/// 任务记录
///
/// 每次成功入队都会产生一条任务记录，`id` 与队列条目 id 相同。
/// 调度核心只写入 `Queued`（入队）和 `Dispatched`（出队）两种状态，
/// 其余状态由外部 worker 通过存储回写。
///
/// # 字段说明
///
/// - `id`: 与 `PrioritizedItem::id` 相同
/// - `scheduler_id`: 所属调度器
/// - `task_type`: 工作类型（boefje / normalizer）
/// - `item`: 入队时的完整条目快照
/// - `job_id`: 关联的周期性作业，由 post_push 最后一步写入
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub scheduler_id: String,
    #[serde(rename = "type")]
    pub task_type: ItemKind,
    pub item: PrioritizedItem,
    pub status: TaskStatus,
    pub job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Task {
    /// 由刚入队的条目创建任务，状态为 `Queued`
    pub fn queued(item: &PrioritizedItem, task_type: ItemKind) -> Self {
        let now = Utc::now();
        Self {
            id: item.id,
            scheduler_id: item.scheduler_id.clone(),
            task_type,
            item: item.clone(),
            status: TaskStatus::Queued,
            job_id: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn hash(&self) -> Option<&str> {
        self.item.hash.as_deref()
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.modified_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// 任务状态
///
/// `Pending → Queued → Dispatched → Running → {Completed | Failed}`，
/// 以及由批量取消写入的 `Cancelled`。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Dispatched,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Dispatched => "dispatched",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "queued" => Ok(TaskStatus::Queued),
            "dispatched" => Ok(TaskStatus::Dispatched),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("未知的任务状态: {s}")),
        }
    }
}

/// 任务查询过滤条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub scheduler_id: Option<String>,
    pub task_type: Option<ItemKind>,
    pub status: Option<TaskStatus>,
    pub min_created_at: Option<DateTime<Utc>>,
    pub max_created_at: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn for_scheduler(scheduler_id: impl Into<String>) -> Self {
        Self {
            scheduler_id: Some(scheduler_id.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// 判断任务是否满足过滤条件（分页参数除外）
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(scheduler_id) = &self.scheduler_id {
            if &task.scheduler_id != scheduler_id {
                return false;
            }
        }
        if let Some(task_type) = self.task_type {
            if task.task_type != task_type {
                return false;
            }
        }
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(min) = self.min_created_at {
            if task.created_at < min {
                return false;
            }
        }
        if let Some(max) = self.max_created_at {
            if task.created_at > max {
                return false;
            }
        }
        true
    }
}
