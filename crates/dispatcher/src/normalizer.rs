use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use scheduler_core::{
    EventSource, ItemKind, Listener, Normalizer, NormalizerTask, Organisation, Plugin,
    PrioritizedItem, RawDataReceived, SchedulerResult,
};
use scheduler_infrastructure::PriorityQueue;

use crate::boefje::{is_queue_full, PUSH_TIMEOUT};
use crate::context::AppContext;
use crate::rankers::{NormalizerRanker, Ranker, Ranking};
use crate::runner::target;
use crate::scheduler::{Scheduler, SchedulingStrategy, StopCallback};

/// 组织的 normalizer 调度器
///
/// 每收到一份原始数据，就为能处理其 mime 类型的每个 normalizer 创建任务。
/// 队列满时尚未入队的 normalizer 留在待处理列表中，下一轮优先处理。
pub struct NormalizerScheduler {
    scheduler: Scheduler,
    ctx: AppContext,
    organisation: Organisation,
    ranker: Arc<dyn Ranker<NormalizerTask>>,
    raw_data_events: Arc<dyn EventSource<RawDataReceived>>,
    pending: Mutex<VecDeque<(Plugin, RawDataReceived)>>,
    listener: Option<Arc<dyn Listener>>,
}

impl NormalizerScheduler {
    pub fn new(
        ctx: AppContext,
        organisation: Organisation,
        raw_data_events: Arc<dyn EventSource<RawDataReceived>>,
    ) -> Self {
        let config = &ctx.config.scheduler;
        let scheduler_id = format!("normalizer-{}", organisation.id);

        let queue = PriorityQueue::new(&scheduler_id, ItemKind::Normalizer, config.pq_maxsize)
            .with_priority_updates(true);
        let scheduler = Scheduler::new(
            scheduler_id,
            queue,
            Arc::clone(&ctx.task_store),
            Arc::clone(&ctx.job_store),
        )
        .with_populate_queue_enabled(config.populate_queue_enabled)
        .with_max_tries(config.max_tries);

        Self {
            scheduler,
            ctx,
            organisation,
            ranker: Arc::new(NormalizerRanker::new()),
            raw_data_events,
            pending: Mutex::new(VecDeque::new()),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_callback(mut self, callback: StopCallback) -> Self {
        self.scheduler = self.scheduler.with_callback(callback);
        self
    }

    pub fn organisation(&self) -> &Organisation {
        &self.organisation
    }

    pub async fn populate_queue(&self) -> SchedulerResult<()> {
        let started = Instant::now();

        if self.push_pending_tasks().await {
            while !self.scheduler.queue().full() {
                let Some(event) = self.raw_data_events.next_event().await? else {
                    break;
                };
                if !self.push_tasks_for_received_raw_data(&event).await {
                    break;
                }
            }
        }

        let metrics = self.scheduler.metrics();
        metrics.record_populate_duration(started.elapsed());
        metrics.set_queue_size(self.scheduler.queue().qsize());
        Ok(())
    }

    /// 上一轮因队列已满而中断的任务；返回 false 表示队列仍然已满
    async fn push_pending_tasks(&self) -> bool {
        let mut pending = self.pending.lock().await;
        while let Some((normalizer, event)) = pending.pop_front() {
            if !self.try_push(&normalizer, &event).await {
                pending.push_front((normalizer, event));
                return false;
            }
        }
        true
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// 返回 false 表示队列已满，剩余的 normalizer 转入待处理列表
    pub async fn push_tasks_for_received_raw_data(&self, event: &RawDataReceived) -> bool {
        debug!(
            scheduler_id = %self.scheduler.scheduler_id(),
            raw_data_id = %event.raw_data.id,
            "收到原始数据"
        );

        let mut normalizers = VecDeque::new();
        for mime_type in event.raw_data.mime_type_values() {
            match self
                .ctx
                .plugin_catalog
                .get_normalizers_by_org_id_and_type(&self.organisation.id, mime_type)
                .await
            {
                Ok(found) => normalizers.extend(found),
                Err(e) => warn!(mime_type, error = %e, "获取mime类型的normalizer失败"),
            }
        }

        while let Some(normalizer) = normalizers.pop_front() {
            if !self.try_push(&normalizer, event).await {
                let mut pending = self.pending.lock().await;
                pending.push_back((normalizer, event.clone()));
                pending.extend(normalizers.into_iter().map(|n| (n, event.clone())));
                debug!(
                    scheduler_id = %self.scheduler.scheduler_id(),
                    raw_data_id = %event.raw_data.id,
                    pending = pending.len(),
                    "队列已满，剩余normalizer留待下一轮"
                );
                return false;
            }
        }
        true
    }

    /// 返回 false 表示队列已满
    async fn try_push(&self, normalizer: &Plugin, event: &RawDataReceived) -> bool {
        match self.create_and_push(normalizer, event).await {
            Ok(()) => true,
            Err(e) if is_queue_full(&e) => {
                info!(scheduler_id = %self.scheduler.scheduler_id(), "队列已满，结束本轮填充");
                false
            }
            Err(e) => {
                warn!(normalizer_id = %normalizer.id, error = %e, "创建normalizer任务失败");
                true
            }
        }
    }

    async fn create_and_push(&self, normalizer: &Plugin, event: &RawDataReceived) -> SchedulerResult<()> {
        if !normalizer.enabled {
            debug!(normalizer_id = %normalizer.id, "normalizer未启用");
            return Ok(());
        }

        let task = NormalizerTask::new(Normalizer::from(normalizer), event.raw_data.clone());
        let hash = task.hash();
        if self.scheduler.is_item_on_queue_by_hash(&hash) {
            debug!(normalizer_id = %normalizer.id, "任务已在队列中");
            return Ok(());
        }

        let Ranking::Due(priority) = self.ranker.rank(&task).await? else {
            return Ok(());
        };

        let item = PrioritizedItem::from_task(self.scheduler.scheduler_id(), task.id, hash, priority, &task)?;
        self.scheduler
            .push_item_to_queue_with_timeout(item, self.scheduler.max_tries(), PUSH_TIMEOUT)
            .await?;
        Ok(())
    }
}

impl SchedulingStrategy for NormalizerScheduler {
    fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    fn run(self: Arc<Self>) {
        if let Some(listener) = &self.listener {
            self.scheduler.register_listener("raw_file_received", Arc::clone(listener));
        }

        if !self.scheduler.populate_queue_enabled() {
            info!(scheduler_id = %self.scheduler.scheduler_id(), "队列填充已关闭");
            return;
        }

        let interval = self.ctx.config.scheduler.populate_interval();
        let this = Arc::clone(&self);
        self.scheduler.run_in_thread(
            "populate_queue",
            target(move || {
                let this = Arc::clone(&this);
                async move { this.populate_queue().await }
            }),
            interval,
            false,
            true,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, Utc};
    use scheduler_core::AppConfig;
    use scheduler_infrastructure::{InMemoryStore, MemoryEventSource};

    use crate::test_utils::{raw_data, FakeObjectGraph, FakePluginCatalog, FakeRawDataService};

    fn scheduler(
        config: AppConfig,
        catalog: FakePluginCatalog,
    ) -> (NormalizerScheduler, Arc<MemoryEventSource<RawDataReceived>>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let events = Arc::new(MemoryEventSource::new());
        let ctx = AppContext::new(
            config,
            store.clone(),
            store.clone(),
            Arc::new(FakeObjectGraph::new()),
            Arc::new(catalog),
            Arc::new(FakeRawDataService::new()),
        );
        let scheduler = NormalizerScheduler::new(ctx, Organisation::new("org1", "Org 1"), events.clone());
        (scheduler, events, store)
    }

    fn received(mime_types: &[&str]) -> RawDataReceived {
        RawDataReceived {
            organization: "org1".to_string(),
            raw_data: raw_data("dns-records", "org1", mime_types),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_raw_data_creates_task_per_normalizer() {
        let catalog = FakePluginCatalog::new().with_normalizers(vec![
            Plugin::normalizer("kat_dns_normalize", &["boefje/dns-records"]),
            Plugin::normalizer("kat_dns_zone", &["boefje/dns-records"]),
            Plugin::normalizer("kat_disabled", &["boefje/dns-records"]).disabled(),
            Plugin::normalizer("kat_nmap_normalize", &["boefje/nmap"]),
        ]);
        let (scheduler, events, store) = scheduler(AppConfig::default(), catalog);
        events.publish(received(&["boefje/dns-records"])).await;

        scheduler.populate_queue().await.unwrap();

        assert_eq!(scheduler.scheduler().queue().qsize(), 2);
        assert_eq!(store.task_count().await, 2);
        assert!(events.is_empty().await);
    }

    #[tokio::test]
    async fn test_same_normalizer_for_multiple_mime_types_is_queued_once() {
        let catalog = FakePluginCatalog::new().with_normalizers(vec![Plugin::normalizer(
            "kat_generic",
            &["text/plain", "application/json"],
        )]);
        let (scheduler, events, _) = scheduler(AppConfig::default(), catalog);
        events.publish(received(&["text/plain", "application/json"])).await;

        scheduler.populate_queue().await.unwrap();
        assert_eq!(scheduler.scheduler().queue().qsize(), 1);
    }

    #[tokio::test]
    async fn test_queue_full_keeps_remaining_normalizers_for_next_round() {
        let mut config = AppConfig::default();
        config.scheduler.pq_maxsize = 1;
        config.scheduler.max_tries = 1;
        let catalog = FakePluginCatalog::new().with_normalizers(vec![
            Plugin::normalizer("kat_dns_normalize", &["boefje/dns-records"]),
            Plugin::normalizer("kat_dns_zone", &["boefje/dns-records"]),
        ]);
        let (scheduler, events, store) = scheduler(config, catalog);
        events.publish(received(&["boefje/dns-records"])).await;

        scheduler.populate_queue().await.unwrap();
        assert_eq!(scheduler.scheduler().queue().qsize(), 1);
        assert_eq!(scheduler.pending_len().await, 1);
        assert!(events.is_empty().await);

        let first: NormalizerTask = scheduler
            .scheduler()
            .pop_item_from_queue(None)
            .await
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(first.normalizer.id, "kat_dns_normalize");

        scheduler.populate_queue().await.unwrap();
        assert_eq!(scheduler.pending_len().await, 0);
        let second: NormalizerTask = scheduler.scheduler().queue().peek().unwrap().decode().unwrap();
        assert_eq!(second.normalizer.id, "kat_dns_zone");
        assert_eq!(store.task_count().await, 2);
    }

    #[tokio::test]
    async fn test_older_raw_data_is_popped_first() {
        let catalog = FakePluginCatalog::new()
            .with_normalizers(vec![Plugin::normalizer("kat_dns_normalize", &["boefje/dns-records"])]);
        let (scheduler, events, _) = scheduler(AppConfig::default(), catalog);

        let mut newer = received(&["boefje/dns-records"]);
        newer.raw_data.boefje_meta.ended_at = Some(Utc::now() - Duration::minutes(1));
        let mut older = received(&["boefje/dns-records"]);
        older.raw_data.boefje_meta.ended_at = Some(Utc::now() - Duration::hours(1));
        let older_id = older.raw_data.id;

        events.publish(newer).await;
        events.publish(older).await;
        scheduler.populate_queue().await.unwrap();

        let first = scheduler.scheduler().pop_item_from_queue(None).await.unwrap();
        let task: NormalizerTask = first.decode().unwrap();
        assert_eq!(task.raw_data.id, older_id);
    }
}
