//! 任务与作业存储接口
//!
//! 调度核心只依赖这里的 CRUD 契约，具体实现位于 `scheduler-infrastructure`：
//! - 内存实现（测试和无数据库部署）
//! - SQLite 实现（`sqlx`）
//!
//! 存储自身保证单条记录写入的一致性，调度核心不做存储侧加锁。
//! `post_push` 中的 Task / Job 写入不是一个事务，每一步都可能独立失败。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Job, Task, TaskFilter};
use crate::SchedulerResult;

/// 任务存储
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_task_by_id(&self, id: Uuid) -> SchedulerResult<Option<Task>>;

    /// 新建任务；同一 id 已存在时返回存储错误
    async fn create_task(&self, task: &Task) -> SchedulerResult<Task>;

    /// 按 id 覆盖写入；任务不存在时返回 `TaskNotFound`
    async fn update_task(&self, task: &Task) -> SchedulerResult<Task>;

    /// 同一哈希的全部任务，最近创建的在前
    async fn get_tasks_by_hash(&self, hash: &str) -> SchedulerResult<Vec<Task>>;

    /// 同一哈希最近创建的任务
    async fn get_latest_task_by_hash(&self, hash: &str) -> SchedulerResult<Option<Task>> {
        Ok(self.get_tasks_by_hash(hash).await?.into_iter().next())
    }

    /// 按条件分页查询，返回当前页以及满足条件的总数
    async fn get_tasks(&self, filter: &TaskFilter) -> SchedulerResult<(Vec<Task>, usize)>;

    /// 将指定任务标记为 `Cancelled`，返回实际更新的数量
    async fn cancel_tasks(&self, scheduler_id: &str, ids: &[Uuid]) -> SchedulerResult<usize>;
}

/// 作业存储
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job_by_hash(&self, hash: &str) -> SchedulerResult<Option<Job>>;

    async fn create_job(&self, job: &Job) -> SchedulerResult<Job>;

    async fn update_job(&self, job: &Job) -> SchedulerResult<Job>;

    /// 调度器的作业，`enabled` 为 `None` 时不过滤启用状态
    async fn get_jobs(&self, scheduler_id: &str, enabled: Option<bool>)
        -> SchedulerResult<Vec<Job>>;

    /// 启用且 `checked_at` 不晚于 `max_checked_at` 的作业，最久未评估的在前
    async fn get_scheduled_jobs(
        &self,
        scheduler_id: &str,
        max_checked_at: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Job>>;
}
