use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use scheduler_core::{
    FilterRequest, Job, JobStore, Listener, PrioritizedItem, QueueError, SchedulerError,
    SchedulerResult, Task, TaskStatus, TaskStore,
};
use scheduler_infrastructure::{MetricsCollector, PriorityQueue, QueueStatus};

use crate::runner::{RunnerTarget, ThreadRunner};

/// stop() 等待每个后台工作者退出的上限
pub const RUNNER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 监听器异常退出后重新连接前的等待时间
pub const LISTENER_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// 调度器停止后的回调，参数为调度器 id
pub type StopCallback = Box<dyn FnOnce(String) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Running,
    Stopping,
    Stopped,
}

/// 调度器状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub id: String,
    pub populate_queue_enabled: bool,
    pub priority_queue: QueueStatus,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 单个队列的调度器
///
/// 持有优先级队列、任务/作业存储和一组后台工作者。入队成功后通过
/// `post_push` 写入任务与作业记录，出队成功后通过 `post_pop` 把任务标记为
/// `Dispatched`。存储写入失败只记录日志，不影响已经完成的队列操作。
pub struct Scheduler {
    scheduler_id: String,
    queue: Arc<PriorityQueue>,
    task_store: Arc<dyn TaskStore>,
    job_store: Arc<dyn JobStore>,
    populate_queue_enabled: bool,
    max_tries: i64,
    listener_retry_interval: Duration,
    metrics: MetricsCollector,
    state: Mutex<SchedulerState>,
    stop_tx: watch::Sender<bool>,
    runners: Mutex<Vec<ThreadRunner>>,
    listeners: Mutex<HashMap<String, Arc<dyn Listener>>>,
    callback: Mutex<Option<StopCallback>>,
}

impl Scheduler {
    pub fn new(
        scheduler_id: impl Into<String>,
        queue: PriorityQueue,
        task_store: Arc<dyn TaskStore>,
        job_store: Arc<dyn JobStore>,
    ) -> Self {
        let scheduler_id = scheduler_id.into();
        let (stop_tx, _) = watch::channel(false);
        Self {
            metrics: MetricsCollector::new(&scheduler_id),
            scheduler_id,
            queue: Arc::new(queue),
            task_store,
            job_store,
            populate_queue_enabled: true,
            max_tries: -1,
            listener_retry_interval: LISTENER_RETRY_INTERVAL,
            state: Mutex::new(SchedulerState::Running),
            stop_tx,
            runners: Mutex::new(Vec::new()),
            listeners: Mutex::new(HashMap::new()),
            callback: Mutex::new(None),
        }
    }

    pub fn with_populate_queue_enabled(mut self, enabled: bool) -> Self {
        self.populate_queue_enabled = enabled;
        self
    }

    /// 等待队列空间的最大尝试次数，-1 表示一直等待
    pub fn with_max_tries(mut self, max_tries: i64) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub fn with_listener_retry_interval(mut self, interval: Duration) -> Self {
        self.listener_retry_interval = interval;
        self
    }

    pub fn with_callback(self, callback: StopCallback) -> Self {
        *lock(&self.callback) = Some(callback);
        self
    }

    pub fn scheduler_id(&self) -> &str {
        &self.scheduler_id
    }

    pub fn queue(&self) -> &Arc<PriorityQueue> {
        &self.queue
    }

    pub fn task_store(&self) -> &Arc<dyn TaskStore> {
        &self.task_store
    }

    pub fn populate_queue_enabled(&self) -> bool {
        self.populate_queue_enabled
    }

    pub fn max_tries(&self) -> i64 {
        self.max_tries
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn state(&self) -> SchedulerState {
        *lock(&self.state)
    }

    pub fn is_alive(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// 停止信号的订阅端，供需要自行观察停止的长操作使用
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub async fn push_item_to_queue(&self, item: PrioritizedItem) -> SchedulerResult<PrioritizedItem> {
        let item = match self.queue.push(item) {
            Ok(item) => item,
            Err(e) => {
                let reason = match &e {
                    QueueError::NotAllowed(_) => "not_allowed",
                    QueueError::QueueFull(_) => "queue_full",
                    QueueError::InvalidPrioritizedItem(_) => "invalid",
                    QueueError::QueueEmpty(_) => "empty",
                };
                warn!(
                    scheduler_id = %self.scheduler_id,
                    qsize = self.queue.qsize(),
                    error = %e,
                    "条目无法入队"
                );
                self.metrics.record_rejection(reason);
                return Err(e.into());
            }
        };

        let qsize = self.queue.qsize();
        debug!(
            scheduler_id = %self.scheduler_id,
            item.id = %item.id,
            item.hash = ?item.hash,
            priority = item.priority,
            qsize,
            "条目已入队"
        );
        self.metrics.record_push(qsize);

        self.post_push(&item).await;
        Ok(item)
    }

    /// 批量入队，跳过策略拒绝、队列已满和无效的条目，返回实际入队数量
    pub async fn push_items_to_queue(&self, items: Vec<PrioritizedItem>) -> SchedulerResult<usize> {
        let mut count = 0;
        for item in items {
            let id = item.id;
            match self.push_item_to_queue(item).await {
                Ok(_) => count += 1,
                Err(e) if e.as_queue_error().is_some_and(QueueError::is_skippable) => {
                    debug!(scheduler_id = %self.scheduler_id, item.id = %id, error = %e, "跳过无法入队的条目");
                }
                Err(e) => {
                    error!(scheduler_id = %self.scheduler_id, item.id = %id, error = %e, "批量入队中止");
                    return Err(e);
                }
            }
        }
        Ok(count)
    }

    /// 等待队列有空间后入队
    ///
    /// 每次检查之间休眠 `timeout`；`max_tries` 为 -1 时一直等待，
    /// 用尽尝试次数仍没有空间则返回 `QueueFull`。
    pub async fn push_item_to_queue_with_timeout(
        &self,
        item: PrioritizedItem,
        max_tries: i64,
        timeout: Duration,
    ) -> SchedulerResult<PrioritizedItem> {
        let mut tries = 0;
        while !self.is_space_on_queue() && (max_tries < 0 || tries < max_tries) {
            debug!(
                scheduler_id = %self.scheduler_id,
                qsize = self.queue.qsize(),
                maxsize = self.queue.maxsize(),
                tries,
                "等待队列空间"
            );
            tokio::time::sleep(timeout).await;
            tries += 1;
        }

        if !self.is_space_on_queue() {
            self.metrics.record_rejection("queue_full");
            return Err(QueueError::QueueFull(self.queue.pq_id().to_string()).into());
        }

        self.push_item_to_queue(item).await
    }

    pub async fn pop_item_from_queue(
        &self,
        filters: Option<&FilterRequest>,
    ) -> SchedulerResult<PrioritizedItem> {
        let item = self.queue.pop(filters)?;
        self.metrics.record_pop(self.queue.qsize());
        self.post_pop(&item).await;
        Ok(item)
    }

    /// 入队后的持久化
    ///
    /// 1. 没有哈希的条目不持久化
    /// 2. 已有同 id 任务时原地更新并返回
    /// 3. 新建 `Queued` 任务
    /// 4. 按哈希查找作业，不存在则新建，已禁用则重新启用
    /// 5. 刷新 `checked_at` 后写回作业
    /// 6. 把作业 id 关联到任务
    ///
    /// 各步骤不在同一事务中，任一步失败都记录日志后返回。
    pub async fn post_push(&self, item: &PrioritizedItem) {
        let Some(hash) = item.hash.as_deref() else {
            warn!(scheduler_id = %self.scheduler_id, item.id = %item.id, "条目没有哈希，不创建任务");
            return;
        };

        match self.task_store.get_task_by_id(item.id).await {
            Ok(Some(mut existing)) => {
                existing.item = item.clone();
                existing.set_status(TaskStatus::Queued);
                if let Err(e) = self.task_store.update_task(&existing).await {
                    self.persistence_failed("update_task", item, &e);
                }
                return;
            }
            Ok(None) => {}
            Err(e) => {
                self.persistence_failed("get_task", item, &e);
                return;
            }
        }

        let mut task = Task::queued(item, self.queue.item_type());
        if let Err(e) = self.task_store.create_task(&task).await {
            self.persistence_failed("create_task", item, &e);
            return;
        }

        let job = match self.job_store.get_job_by_hash(hash).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                let job = Job::new(hash, item);
                match self.job_store.create_job(&job).await {
                    Ok(job) => job,
                    Err(e) => {
                        self.persistence_failed("create_job", item, &e);
                        return;
                    }
                }
            }
            Err(e) => {
                self.persistence_failed("get_job", item, &e);
                return;
            }
        };

        let mut job = job;
        if !job.enabled {
            job.enable();
        }
        job.mark_checked();
        if let Err(e) = self.job_store.update_job(&job).await {
            self.persistence_failed("update_job", item, &e);
            return;
        }

        task.job_id = Some(job.id);
        task.modified_at = Utc::now();
        if let Err(e) = self.task_store.update_task(&task).await {
            self.persistence_failed("link_job", item, &e);
        }
    }

    /// 出队后把任务标记为 `Dispatched`
    pub async fn post_pop(&self, item: &PrioritizedItem) {
        let mut task = match self.task_store.get_task_by_id(item.id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(
                    scheduler_id = %self.scheduler_id,
                    item.id = %item.id,
                    "任务记录不存在，不更新状态"
                );
                return;
            }
            Err(e) => {
                self.persistence_failed("get_task", item, &e);
                return;
            }
        };

        task.set_status(TaskStatus::Dispatched);
        if let Err(e) = self.task_store.update_task(&task).await {
            self.persistence_failed("dispatch_task", item, &e);
        }
    }

    fn persistence_failed(&self, step: &'static str, item: &PrioritizedItem, e: &SchedulerError) {
        warn!(
            scheduler_id = %self.scheduler_id,
            item.id = %item.id,
            item.hash = ?item.hash,
            step,
            error = %e,
            "写入存储失败"
        );
        self.metrics.record_persistence_failure(step);
    }

    /// `maxsize` 为 0 表示不限
    pub fn is_space_on_queue(&self) -> bool {
        let maxsize = self.queue.maxsize();
        maxsize == 0 || self.queue.qsize() < maxsize
    }

    pub fn is_item_on_queue_by_hash(&self, hash: &str) -> bool {
        self.queue.is_item_on_queue_by_hash(hash)
    }

    /// 启动一个绑定到本调度器停止信号的后台工作者
    pub fn run_in_thread(
        &self,
        name: &str,
        target: RunnerTarget,
        interval: Duration,
        daemon: bool,
        looping: bool,
    ) {
        if !self.is_alive() {
            warn!(scheduler_id = %self.scheduler_id, runner = name, "调度器已停止，不再启动后台工作者");
            return;
        }

        let runner = ThreadRunner::start(
            format!("{}-{}", self.scheduler_id, name),
            target,
            self.stop_tx.subscribe(),
            interval,
            daemon,
            looping,
        );
        lock(&self.runners).push(runner);
    }

    /// 注册并启动监听器；调度器停止时会先停止所有监听器
    ///
    /// `listen()` 返回（连接断开或出错）后间隔 `listener_retry_interval`
    /// 重新调用，直到调度器停止。
    pub fn register_listener(&self, name: &str, listener: Arc<dyn Listener>) {
        lock(&self.listeners).insert(name.to_string(), Arc::clone(&listener));

        let stop_rx = self.stop_signal();
        let scheduler_id = self.scheduler_id.clone();
        let listener_name = name.to_string();
        let target: RunnerTarget = Arc::new(move || {
            let listener = Arc::clone(&listener);
            let stopped = *stop_rx.borrow();
            let scheduler_id = scheduler_id.clone();
            let listener_name = listener_name.clone();
            Box::pin(async move {
                if stopped {
                    return Ok(());
                }
                debug!(scheduler_id = %scheduler_id, listener = %listener_name, "监听器开始监听");
                listener.listen().await
            })
        });
        self.run_in_thread(name, target, self.listener_retry_interval, true, true);
    }

    /// 停止调度器：先停监听器，再发停止信号并等待后台工作者退出，
    /// 最后调用一次回调。重复调用无效果。
    pub async fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if *state != SchedulerState::Running {
                return;
            }
            *state = SchedulerState::Stopping;
        }
        info!(scheduler_id = %self.scheduler_id, "正在停止调度器");

        let listeners: Vec<(String, Arc<dyn Listener>)> = lock(&self.listeners).drain().collect();
        for (name, listener) in listeners {
            if let Err(e) = listener.stop().await {
                warn!(scheduler_id = %self.scheduler_id, listener = %name, error = %e, "停止监听器失败");
            }
        }

        self.stop_tx.send_replace(true);

        let mut runners = std::mem::take(&mut *lock(&self.runners));
        for runner in runners.iter_mut() {
            runner.join(RUNNER_JOIN_TIMEOUT).await;
        }

        *lock(&self.state) = SchedulerState::Stopped;

        let callback = lock(&self.callback).take();
        if let Some(callback) = callback {
            callback(self.scheduler_id.clone());
        }
        info!(scheduler_id = %self.scheduler_id, "调度器已停止");
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            id: self.scheduler_id.clone(),
            populate_queue_enabled: self.populate_queue_enabled,
            priority_queue: self.queue.status(),
        }
    }
}

/// 具体调度策略
///
/// 策略包装一个 `Scheduler`，在 `run` 中注册监听器和填充队列的后台工作者。
#[async_trait]
pub trait SchedulingStrategy: Send + Sync {
    fn scheduler(&self) -> &Scheduler;

    fn run(self: Arc<Self>);

    fn scheduler_id(&self) -> &str {
        self.scheduler().scheduler_id()
    }

    fn status(&self) -> SchedulerStatus {
        self.scheduler().status()
    }

    fn is_alive(&self) -> bool {
        self.scheduler().is_alive()
    }

    async fn stop(&self) {
        self.scheduler().stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use scheduler_core::{ItemKind, TaskFilter};
    use scheduler_infrastructure::InMemoryStore;

    use crate::runner::target;
    use crate::test_utils::{boefje_item, FailingStore};

    fn scheduler_with(store: Arc<InMemoryStore>, maxsize: usize) -> Scheduler {
        let queue = PriorityQueue::new("boefje-org1", ItemKind::Boefje, maxsize);
        Scheduler::new("boefje-org1", queue, store.clone(), store)
    }

    #[tokio::test]
    async fn test_push_creates_task_and_job() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler_with(store.clone(), 10);

        let item = scheduler
            .push_item_to_queue(boefje_item("boefje-org1", "dns-records", "Hostname|internet|a.com", 5))
            .await
            .unwrap();

        let task = store.get_task_by_id(item.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        let job = store.get_job_by_hash(item.hash.as_deref().unwrap()).await.unwrap().unwrap();
        assert!(job.enabled);
        assert_eq!(task.job_id, Some(job.id));
    }

    #[tokio::test]
    async fn test_push_without_hash_is_not_persisted() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler_with(store.clone(), 10);

        let mut item = boefje_item("boefje-org1", "dns-records", "Hostname|internet|a.com", 5);
        item.hash = None;
        scheduler.push_item_to_queue(item).await.unwrap();

        assert_eq!(scheduler.queue().qsize(), 1);
        assert_eq!(store.task_count().await, 0);
        assert_eq!(store.job_count().await, 0);
    }

    #[tokio::test]
    async fn test_pop_without_hash_leaves_store_untouched() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler_with(store.clone(), 10);

        let mut item = boefje_item("boefje-org1", "dns-records", "Hostname|internet|a.com", 5);
        item.hash = None;
        let pushed = scheduler.push_item_to_queue(item).await.unwrap();

        let popped = scheduler.pop_item_from_queue(None).await.unwrap();
        assert_eq!(popped.id, pushed.id);
        assert_eq!(scheduler.queue().qsize(), 0);
        assert_eq!(store.task_count().await, 0);
        assert!(store.get_task_by_id(pushed.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_refreshes_job_checked_at() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler_with(store.clone(), 10);

        let first = boefje_item("boefje-org1", "dns-records", "Hostname|internet|a.com", 5);
        let hash = first.hash.clone().unwrap();
        scheduler.push_item_to_queue(first).await.unwrap();
        scheduler.pop_item_from_queue(None).await.unwrap();

        let mut job = store.get_job_by_hash(&hash).await.unwrap().unwrap();
        job.checked_at = Utc::now() - chrono::Duration::days(1);
        store.update_job(&job).await.unwrap();

        scheduler
            .push_item_to_queue(boefje_item("boefje-org1", "dns-records", "Hostname|internet|a.com", 5))
            .await
            .unwrap();
        let job = store.get_job_by_hash(&hash).await.unwrap().unwrap();
        assert!(job.checked_at > Utc::now() - chrono::Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_push_reenables_disabled_job() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler_with(store.clone(), 10);

        let first = boefje_item("boefje-org1", "dns-records", "Hostname|internet|a.com", 5);
        let hash = first.hash.clone().unwrap();
        scheduler.push_item_to_queue(first).await.unwrap();
        scheduler.pop_item_from_queue(None).await.unwrap();

        let mut job = store.get_job_by_hash(&hash).await.unwrap().unwrap();
        job.disable();
        store.update_job(&job).await.unwrap();

        let second = boefje_item("boefje-org1", "dns-records", "Hostname|internet|a.com", 5);
        let second = scheduler.push_item_to_queue(second).await.unwrap();

        let job_after = store.get_job_by_hash(&hash).await.unwrap().unwrap();
        assert!(job_after.enabled);
        assert_eq!(job_after.id, job.id);
        assert_eq!(store.job_count().await, 1);
        let task = store.get_task_by_id(second.id).await.unwrap().unwrap();
        assert_eq!(task.job_id, Some(job.id));
    }

    #[tokio::test]
    async fn test_repush_of_same_id_updates_task_in_place() {
        let store = Arc::new(InMemoryStore::new());
        let queue = PriorityQueue::new("boefje-org1", ItemKind::Boefje, 10).with_priority_updates(true);
        let scheduler = Scheduler::new("boefje-org1", queue, store.clone(), store.clone());

        let item = boefje_item("boefje-org1", "dns-records", "Hostname|internet|a.com", 5);
        scheduler.push_item_to_queue(item.clone()).await.unwrap();

        let mut updated = item.clone();
        updated.priority = 1;
        scheduler.push_item_to_queue(updated).await.unwrap();

        assert_eq!(store.task_count().await, 1);
        let task = store.get_task_by_id(item.id).await.unwrap().unwrap();
        assert_eq!(task.item.priority, 1);
    }

    #[tokio::test]
    async fn test_pop_marks_task_dispatched() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler_with(store.clone(), 10);

        let item = scheduler
            .push_item_to_queue(boefje_item("boefje-org1", "dns-records", "Hostname|internet|a.com", 5))
            .await
            .unwrap();
        let popped = scheduler.pop_item_from_queue(None).await.unwrap();
        assert_eq!(popped.id, item.id);

        let task = store.get_task_by_id(item.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Dispatched);

        let err = scheduler.pop_item_from_queue(None).await.unwrap_err();
        assert!(matches!(err.as_queue_error(), Some(QueueError::QueueEmpty(_))));
    }

    #[tokio::test]
    async fn test_push_items_skips_rejections() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler_with(store.clone(), 2);

        let items = vec![
            boefje_item("boefje-org1", "dns-records", "Hostname|internet|a.com", 5),
            boefje_item("boefje-org1", "dns-records", "Hostname|internet|a.com", 4),
            boefje_item("boefje-org1", "dns-records", "Hostname|internet|b.com", 3),
            boefje_item("boefje-org1", "dns-records", "Hostname|internet|c.com", 2),
        ];
        let pushed = scheduler.push_items_to_queue(items).await.unwrap();

        assert_eq!(pushed, 2);
        assert_eq!(scheduler.queue().qsize(), 2);
        let (tasks, total) = store
            .get_tasks(&TaskFilter::for_scheduler("boefje-org1"))
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(tasks.len(), 2);
    }

    #[tokio::test]
    async fn test_push_with_timeout_gives_up_when_full() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler_with(store, 1);
        scheduler
            .push_item_to_queue(boefje_item("boefje-org1", "dns-records", "Hostname|internet|a.com", 5))
            .await
            .unwrap();

        let err = scheduler
            .push_item_to_queue_with_timeout(
                boefje_item("boefje-org1", "dns-records", "Hostname|internet|b.com", 5),
                3,
                Duration::from_millis(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.as_queue_error(), Some(QueueError::QueueFull(_))));
    }

    #[tokio::test]
    async fn test_push_with_timeout_waits_for_space() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = Arc::new(scheduler_with(store, 1));
        scheduler
            .push_item_to_queue(boefje_item("boefje-org1", "dns-records", "Hostname|internet|a.com", 5))
            .await
            .unwrap();

        let consumer = Arc::clone(&scheduler);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            consumer.pop_item_from_queue(None).await.unwrap();
        });

        let item = scheduler
            .push_item_to_queue_with_timeout(
                boefje_item("boefje-org1", "dns-records", "Hostname|internet|b.com", 5),
                -1,
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert!(scheduler.is_item_on_queue_by_hash(item.hash.as_deref().unwrap()));
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_item_queued() {
        let store = Arc::new(FailingStore);
        let queue = PriorityQueue::new("boefje-org1", ItemKind::Boefje, 10);
        let scheduler = Scheduler::new("boefje-org1", queue, store.clone(), store);

        let item = scheduler
            .push_item_to_queue(boefje_item("boefje-org1", "dns-records", "Hostname|internet|a.com", 5))
            .await
            .unwrap();
        assert!(scheduler.is_item_on_queue_by_hash(item.hash.as_deref().unwrap()));

        let popped = scheduler.pop_item_from_queue(None).await.unwrap();
        assert_eq!(popped.id, item.id);
    }

    #[tokio::test]
    async fn test_space_on_unbounded_queue() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler_with(store, 0);
        for n in 0..20 {
            let ooi = format!("Hostname|internet|{n}.com");
            scheduler
                .push_item_to_queue(boefje_item("boefje-org1", "dns-records", &ooi, n))
                .await
                .unwrap();
        }
        assert!(scheduler.is_space_on_queue());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_calls_back_once() {
        let store = Arc::new(InMemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let scheduler = scheduler_with(store, 10).with_callback(Box::new(move |id| {
            assert_eq!(id, "boefje-org1");
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        scheduler.run_in_thread(
            "noop",
            target(|| async { Ok(()) }),
            Duration::from_millis(5),
            false,
            true,
        );
        assert!(scheduler.is_alive());

        scheduler.stop().await;
        scheduler.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(!scheduler.is_alive());
    }

    /// 每次监听都立即失败的监听器
    struct FlakyListener {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Listener for FlakyListener {
        async fn listen(&self) -> SchedulerResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SchedulerError::MessageQueue("连接被拒绝".to_string()))
        }

        async fn stop(&self) -> SchedulerResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_listener_is_restarted_until_stop() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler =
            scheduler_with(store, 10).with_listener_retry_interval(Duration::from_millis(10));
        let listener = Arc::new(FlakyListener {
            calls: AtomicUsize::new(0),
        });

        scheduler.register_listener("raw_file_received", listener.clone());
        tokio::time::timeout(Duration::from_secs(2), async {
            while listener.calls.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        scheduler.stop().await;
        let after_stop = listener.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.calls.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = scheduler_with(store, 10).with_populate_queue_enabled(false);
        let status = scheduler.status();
        assert_eq!(status.id, "boefje-org1");
        assert!(!status.populate_queue_enabled);
        assert_eq!(status.priority_queue.maxsize, 10);
        assert_eq!(status.priority_queue.qsize, 0);
    }
}
