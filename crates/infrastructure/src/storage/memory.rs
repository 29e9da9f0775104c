use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use scheduler_core::{
    Job, JobStore, SchedulerError, SchedulerResult, Task, TaskFilter, TaskStatus, TaskStore,
};

#[derive(Default)]
struct TaskTable {
    rows: HashMap<Uuid, (u64, Task)>,
    next_seq: u64,
}

impl TaskTable {
    /// 按创建时间倒序，同一时间按写入顺序倒序
    fn sorted<'a>(&'a self, mut pred: impl FnMut(&Task) -> bool) -> Vec<&'a Task> {
        let mut rows: Vec<&(u64, Task)> = self.rows.values().filter(|(_, t)| pred(t)).collect();
        rows.sort_by(|(sa, a), (sb, b)| b.created_at.cmp(&a.created_at).then(sb.cmp(sa)));
        rows.into_iter().map(|(_, t)| t).collect()
    }
}

/// 进程内任务/作业存储
#[derive(Default)]
pub struct InMemoryStore {
    tasks: RwLock<TaskTable>,
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.rows.len()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn get_task_by_id(&self, id: Uuid) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.read().await.rows.get(&id).map(|(_, t)| t.clone()))
    }

    async fn create_task(&self, task: &Task) -> SchedulerResult<Task> {
        let mut table = self.tasks.write().await;
        if table.rows.contains_key(&task.id) {
            return Err(SchedulerError::store_error(format!("任务已存在: {}", task.id)));
        }
        let seq = table.next_seq;
        table.next_seq += 1;
        table.rows.insert(task.id, (seq, task.clone()));
        debug!(task_id = %task.id, scheduler_id = %task.scheduler_id, "创建任务记录");
        Ok(task.clone())
    }

    async fn update_task(&self, task: &Task) -> SchedulerResult<Task> {
        let mut table = self.tasks.write().await;
        match table.rows.get_mut(&task.id) {
            Some((_, stored)) => {
                *stored = task.clone();
                Ok(task.clone())
            }
            None => Err(SchedulerError::task_not_found(task.id.to_string())),
        }
    }

    async fn get_tasks_by_hash(&self, hash: &str) -> SchedulerResult<Vec<Task>> {
        let table = self.tasks.read().await;
        Ok(table
            .sorted(|t| t.hash() == Some(hash))
            .into_iter()
            .cloned()
            .collect())
    }

    async fn get_tasks(&self, filter: &TaskFilter) -> SchedulerResult<(Vec<Task>, usize)> {
        let table = self.tasks.read().await;
        let matching = table.sorted(|t| filter.matches(t));
        let count = matching.len();
        let page = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok((page, count))
    }

    async fn cancel_tasks(&self, scheduler_id: &str, ids: &[Uuid]) -> SchedulerResult<usize> {
        let mut table = self.tasks.write().await;
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, task)) = table.rows.get_mut(id) {
                if task.scheduler_id == scheduler_id && !task.is_terminal() {
                    task.set_status(TaskStatus::Cancelled);
                    cancelled += 1;
                }
            }
        }
        Ok(cancelled)
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn get_job_by_hash(&self, hash: &str) -> SchedulerResult<Option<Job>> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .find(|j| j.hash == hash)
            .cloned())
    }

    async fn create_job(&self, job: &Job) -> SchedulerResult<Job> {
        let mut jobs = self.jobs.write().await;
        if jobs
            .values()
            .any(|j| j.id == job.id || (j.scheduler_id == job.scheduler_id && j.hash == job.hash))
        {
            return Err(SchedulerError::store_error(format!(
                "作业已存在: scheduler_id={}, hash={}",
                job.scheduler_id, job.hash
            )));
        }
        jobs.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn update_job(&self, job: &Job) -> SchedulerResult<Job> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                stored.modified_at = Utc::now();
                Ok(stored.clone())
            }
            None => Err(SchedulerError::store_error(format!("作业不存在: {}", job.id))),
        }
    }

    async fn get_jobs(&self, scheduler_id: &str, enabled: Option<bool>) -> SchedulerResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut result: Vec<Job> = jobs
            .values()
            .filter(|j| j.scheduler_id == scheduler_id)
            .filter(|j| enabled.map_or(true, |e| j.enabled == e))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    async fn get_scheduled_jobs(
        &self,
        scheduler_id: &str,
        max_checked_at: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut result: Vec<Job> = jobs
            .values()
            .filter(|j| j.scheduler_id == scheduler_id && j.enabled)
            .filter(|j| j.checked_at <= max_checked_at)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.checked_at.cmp(&b.checked_at));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::{ItemKind, PrioritizedItem};
    use serde_json::json;

    fn task(hash: &str) -> Task {
        let item = PrioritizedItem::new("boefje-org1", Some(hash.to_string()), 1, json!({}));
        Task::queued(&item, ItemKind::Boefje)
    }

    #[tokio::test]
    async fn test_create_and_get_task() {
        let store = InMemoryStore::new();
        let t = task("h1");
        store.create_task(&t).await.unwrap();

        let loaded = store.get_task_by_id(t.id).await.unwrap().unwrap();
        assert_eq!(loaded, t);
        assert!(store.create_task(&t).await.is_err());
    }

    #[tokio::test]
    async fn test_update_missing_task_fails() {
        let store = InMemoryStore::new();
        let err = store.update_task(&task("h1")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::TaskNotFound { .. }));
    }

    #[tokio::test]
    async fn test_tasks_by_hash_most_recent_first() {
        let store = InMemoryStore::new();
        let first = task("h1");
        let second = task("h1");
        store.create_task(&first).await.unwrap();
        store.create_task(&second).await.unwrap();
        store.create_task(&task("h2")).await.unwrap();

        let tasks = store.get_tasks_by_hash("h1").await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, second.id);
        assert_eq!(
            store.get_latest_task_by_hash("h1").await.unwrap().unwrap().id,
            second.id
        );
    }

    #[tokio::test]
    async fn test_get_tasks_paginates_with_total() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.create_task(&task(&format!("h{i}"))).await.unwrap();
        }

        let filter = TaskFilter::for_scheduler("boefje-org1").with_limit(1, 2);
        let (page, total) = store.get_tasks(&filter).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_tasks_skips_terminal() {
        let store = InMemoryStore::new();
        let open = task("h1");
        let mut done = task("h2");
        done.set_status(TaskStatus::Completed);
        store.create_task(&open).await.unwrap();
        store.create_task(&done).await.unwrap();

        let cancelled = store
            .cancel_tasks("boefje-org1", &[open.id, done.id])
            .await
            .unwrap();
        assert_eq!(cancelled, 1);
        let reloaded = store.get_task_by_id(open.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_job_unique_per_scheduler_and_hash() {
        let store = InMemoryStore::new();
        let item = PrioritizedItem::new("boefje-org1", Some("h1".into()), 1, json!({}));
        let job = Job::from_item(&item).unwrap();
        store.create_job(&job).await.unwrap();

        let duplicate = Job::from_item(&item).unwrap();
        assert!(store.create_job(&duplicate).await.is_err());

        let mut disabled = job.clone();
        disabled.disable();
        store.update_job(&disabled).await.unwrap();
        assert!(store.get_jobs("boefje-org1", Some(true)).await.unwrap().is_empty());
        assert_eq!(store.get_jobs("boefje-org1", None).await.unwrap().len(), 1);
        assert!(!store.get_job_by_hash("h1").await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn test_scheduled_jobs_filter_by_checked_at() {
        let store = InMemoryStore::new();
        let stale_item = PrioritizedItem::new("boefje-org1", Some("h1".into()), 1, json!({}));
        let mut stale = Job::new("h1", &stale_item);
        stale.checked_at = Utc::now() - chrono::Duration::hours(2);
        store.create_job(&stale).await.unwrap();

        let fresh_item = PrioritizedItem::new("boefje-org1", Some("h2".into()), 1, json!({}));
        store.create_job(&Job::new("h2", &fresh_item)).await.unwrap();

        let disabled_item = PrioritizedItem::new("boefje-org1", Some("h3".into()), 1, json!({}));
        let mut disabled = Job::new("h3", &disabled_item);
        disabled.checked_at = Utc::now() - chrono::Duration::hours(3);
        disabled.enabled = false;
        store.create_job(&disabled).await.unwrap();

        let due = store
            .get_scheduled_jobs("boefje-org1", Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].hash, "h1");
        assert!(store
            .get_scheduled_jobs("normalizer-org1", Utc::now())
            .await
            .unwrap()
            .is_empty());
    }
}
