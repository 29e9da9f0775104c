use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use scheduler_core::config::BoefjeRankerKind;
use scheduler_core::{
    Boefje, BoefjeTask, EventSource, ItemKind, Job, Listener, MutationOperationType, Ooi,
    Organisation, Plugin, PrioritizedItem, QueueError, ScanProfileMutation, SchedulerError,
    SchedulerResult,
};
use scheduler_infrastructure::PriorityQueue;

use crate::context::AppContext;
use crate::rankers::{BoefjeRanker, BoefjeRankerTimeBased, Ranker, Ranking};
use crate::runner::target;
use crate::scheduler::{Scheduler, SchedulingStrategy, StopCallback};

/// 带超时入队时两次容量检查之间的间隔
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// 所有可扫描的级别
const SCAN_LEVELS: [u8; 4] = [1, 2, 3, 4];

pub(crate) fn is_queue_full(e: &SchedulerError) -> bool {
    matches!(e.as_queue_error(), Some(QueueError::QueueFull(_)))
}

/// 组织的 boefje 调度器
///
/// 每轮填充依次处理扫描级别变更事件和新启用的 boefje，然后重新评估
/// 到期的作业，最后随机抽取对象。变更事件处理到一半队列已满时，
/// 剩余的 boefje 留在待处理列表中，下一轮优先处理。
pub struct BoefjeScheduler {
    scheduler: Scheduler,
    ctx: AppContext,
    organisation: Organisation,
    ranker: Arc<dyn Ranker<BoefjeTask>>,
    mutations: Arc<dyn EventSource<ScanProfileMutation>>,
    pending: Mutex<VecDeque<(Plugin, Ooi)>>,
    listener: Option<Arc<dyn Listener>>,
}

impl BoefjeScheduler {
    pub fn new(
        ctx: AppContext,
        organisation: Organisation,
        mutations: Arc<dyn EventSource<ScanProfileMutation>>,
    ) -> Self {
        let config = &ctx.config.scheduler;
        let scheduler_id = format!("boefje-{}", organisation.id);

        let queue = PriorityQueue::new(&scheduler_id, ItemKind::Boefje, config.pq_maxsize)
            .with_priority_updates(true);
        let scheduler = Scheduler::new(
            scheduler_id,
            queue,
            Arc::clone(&ctx.task_store),
            Arc::clone(&ctx.job_store),
        )
        .with_populate_queue_enabled(config.populate_queue_enabled)
        .with_max_tries(config.max_tries);

        let ranker: Arc<dyn Ranker<BoefjeTask>> = match config.boefje_ranker {
            BoefjeRankerKind::RecencyDecay => Arc::new(BoefjeRanker::new(
                Arc::clone(&ctx.task_store),
                Arc::clone(&ctx.object_graph),
                config.grace_period(),
            )),
            BoefjeRankerKind::TimeBased => Arc::new(BoefjeRankerTimeBased::new()),
        };

        Self {
            scheduler,
            ctx,
            organisation,
            ranker,
            mutations,
            pending: Mutex::new(VecDeque::new()),
            listener: None,
        }
    }

    /// 监听扫描级别变更的监听器，`run` 时注册
    pub fn with_listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_ranker(mut self, ranker: Arc<dyn Ranker<BoefjeTask>>) -> Self {
        self.ranker = ranker;
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

        self.push_tasks_for_scan_profile_mutations().await?;
        self.push_tasks_for_new_boefjes().await?;
        self.push_tasks_for_scheduled_jobs().await?;
        self.push_tasks_for_random_objects().await?;

        let metrics = self.scheduler.metrics();
        metrics.record_populate_duration(started.elapsed());
        metrics.set_queue_size(self.scheduler.queue().qsize());
        Ok(())
    }

    /// 为扫描级别发生变化的对象创建任务，直到没有事件或队列已满
    pub async fn push_tasks_for_scan_profile_mutations(&self) -> SchedulerResult<()> {
        if !self.push_pending_tasks().await {
            return Ok(());
        }

        while !self.scheduler.queue().full() {
            let Some(mutation) = self.mutations.next_event().await? else {
                return Ok(());
            };

            let ooi = match (mutation.operation, mutation.value) {
                (MutationOperationType::Delete, _) | (_, None) => {
                    debug!(
                        scheduler_id = %self.scheduler.scheduler_id(),
                        primary_key = %mutation.primary_key,
                        "对象已删除或变更没有对象，跳过"
                    );
                    continue;
                }
                (_, Some(ooi)) => ooi,
            };

            let mut boefjes: VecDeque<Plugin> = self.get_boefjes_for_ooi(&ooi).await.into();
            while let Some(boefje) = boefjes.pop_front() {
                if !self.try_push(&boefje, &ooi).await {
                    let mut pending = self.pending.lock().await;
                    pending.push_back((boefje, ooi.clone()));
                    pending.extend(boefjes.into_iter().map(|b| (b, ooi.clone())));
                    debug!(
                        scheduler_id = %self.scheduler.scheduler_id(),
                        ooi = %ooi.primary_key,
                        pending = pending.len(),
                        "队列已满，剩余boefje留待下一轮"
                    );
                    return Ok(());
                }
            }
        }

        info!(
            scheduler_id = %self.scheduler.scheduler_id(),
            qsize = self.scheduler.queue().qsize(),
            "队列已满，暂停处理扫描级别变更"
        );
        Ok(())
    }

    /// 上一轮因队列已满而中断的变更任务；返回 false 表示队列仍然已满
    async fn push_pending_tasks(&self) -> bool {
        let mut pending = self.pending.lock().await;
        while let Some((boefje, ooi)) = pending.pop_front() {
            if !self.try_push(&boefje, &ooi).await {
                pending.push_front((boefje, ooi));
                return false;
            }
        }
        true
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// 重新评估超过宽限期未检查的作业
    ///
    /// 作业中保存的任务按当前的对象和 boefje 重新走一遍入队前的检查。
    /// 没有入队的作业刷新 `checked_at`，宽限期内不再评估；入队成功的作业
    /// 由 `post_push` 刷新。
    pub async fn push_tasks_for_scheduled_jobs(&self) -> SchedulerResult<()> {
        if self.scheduler.queue().full() {
            info!(scheduler_id = %self.scheduler.scheduler_id(), "队列已满，不处理到期作业");
            return Ok(());
        }

        let grace_period = chrono::Duration::from_std(self.ctx.config.scheduler.grace_period())
            .unwrap_or(chrono::Duration::zero());
        let jobs = match self
            .ctx
            .job_store
            .get_scheduled_jobs(self.scheduler.scheduler_id(), Utc::now() - grace_period)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(scheduler_id = %self.scheduler.scheduler_id(), error = %e, "获取到期作业失败");
                return Ok(());
            }
        };

        debug!(scheduler_id = %self.scheduler.scheduler_id(), jobs = jobs.len(), "到期作业");
        for mut job in jobs {
            let pushed = match self.resolve_job(&job).await {
                Some((boefje, ooi)) => match self.create_and_push(&boefje, &ooi).await {
                    Ok(pushed) => pushed,
                    Err(e) if is_queue_full(&e) => {
                        info!(scheduler_id = %self.scheduler.scheduler_id(), "队列已满，结束本轮填充");
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "重新评估作业失败");
                        false
                    }
                },
                None => false,
            };

            if !pushed {
                job.mark_checked();
                if let Err(e) = self.ctx.job_store.update_job(&job).await {
                    warn!(job_id = %job.id, error = %e, "更新作业检查时间失败");
                }
            }
        }
        Ok(())
    }

    /// 作业对应的 boefje 和对象；任一已不存在时返回 `None`
    async fn resolve_job(&self, job: &Job) -> Option<(Plugin, Ooi)> {
        let task: BoefjeTask = match job.item.decode() {
            Ok(task) => task,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "无法从作业解析任务");
                return None;
            }
        };
        let input_ooi = task.input_ooi.as_deref()?;

        let ooi = match self
            .ctx
            .object_graph
            .get_object(&self.organisation.id, input_ooi)
            .await
        {
            Ok(ooi) => ooi,
            Err(e) => {
                debug!(job_id = %job.id, ooi = input_ooi, error = %e, "作业的对象已不可用");
                return None;
            }
        };

        let boefje = self
            .get_boefjes_for_ooi(&ooi)
            .await
            .into_iter()
            .find(|b| b.id == task.boefje.id);
        if boefje.is_none() {
            debug!(job_id = %job.id, boefje_id = %task.boefje.id, "作业的boefje已不可用");
        }
        boefje.map(|boefje| (boefje, ooi))
    }

    /// 为新启用的 boefje 在所有可运行的对象上创建任务
    pub async fn push_tasks_for_new_boefjes(&self) -> SchedulerResult<()> {
        if self.scheduler.queue().full() {
            info!(scheduler_id = %self.scheduler.scheduler_id(), "队列已满，不处理新的boefje");
            return Ok(());
        }

        let new_boefjes = match self
            .ctx
            .plugin_catalog
            .get_new_boefjes_by_org_id(&self.organisation.id)
            .await
        {
            Ok(boefjes) => boefjes,
            Err(e) => {
                warn!(scheduler_id = %self.scheduler.scheduler_id(), error = %e, "获取新boefje失败");
                return Ok(());
            }
        };

        for boefje in &new_boefjes {
            let Some(level) = boefje.scan_level else {
                continue;
            };
            let scan_levels: Vec<u8> = SCAN_LEVELS.into_iter().filter(|l| *l >= level).collect();

            let oois = match self
                .ctx
                .object_graph
                .get_objects_by_object_types(&self.organisation.id, &boefje.consumes, &scan_levels)
                .await
            {
                Ok(oois) => oois,
                Err(e) => {
                    warn!(boefje_id = %boefje.id, error = %e, "获取boefje可运行的对象失败");
                    continue;
                }
            };

            debug!(boefje_id = %boefje.id, objects = oois.len(), "新boefje的候选对象");
            for ooi in &oois {
                if !self.try_push(boefje, ooi).await {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// 随机抽取一批对象重新评估
    pub async fn push_tasks_for_random_objects(&self) -> SchedulerResult<()> {
        if self.scheduler.queue().full() {
            info!(scheduler_id = %self.scheduler.scheduler_id(), "队列已满，不处理随机对象");
            return Ok(());
        }

        let oois = match self
            .ctx
            .object_graph
            .get_random_objects(
                &self.organisation.id,
                self.ctx.config.scheduler.pq_populate_max_random_objects,
                &SCAN_LEVELS,
            )
            .await
        {
            Ok(oois) => oois,
            Err(e) => {
                warn!(scheduler_id = %self.scheduler.scheduler_id(), error = %e, "获取随机对象失败");
                return Ok(());
            }
        };

        for ooi in &oois {
            let boefjes = self.get_boefjes_for_ooi(ooi).await;
            for boefje in &boefjes {
                if !self.try_push(boefje, ooi).await {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// boefje 启用，且对象有扫描级别且不低于 boefje 的扫描强度
    pub fn is_task_allowed_to_run(&self, boefje: &Plugin, ooi: &Ooi) -> bool {
        if !boefje.enabled {
            debug!(boefje_id = %boefje.id, "boefje未启用");
            return false;
        }

        let Some(ooi_level) = ooi.scan_level() else {
            debug!(ooi = %ooi.primary_key, "对象没有扫描级别");
            return false;
        };

        let Some(boefje_level) = boefje.scan_level else {
            warn!(boefje_id = %boefje.id, "boefje没有扫描级别");
            return false;
        };

        if boefje_level > ooi_level {
            debug!(
                boefje_id = %boefje.id,
                ooi = %ooi.primary_key,
                boefje_level,
                ooi_level,
                "boefje扫描强度高于对象允许的级别"
            );
            return false;
        }
        true
    }

    /// 任务是否仍在运行，或上次运行仍在宽限期内
    ///
    /// 依次参考任务存储中同一哈希最近的任务和原始数据服务中最近一次运行记录。
    pub async fn is_task_running(&self, task: &BoefjeTask) -> SchedulerResult<bool> {
        let grace_period = chrono::Duration::from_std(self.ctx.config.scheduler.grace_period())
            .unwrap_or(chrono::Duration::zero());
        let now = Utc::now();

        let latest = self.ctx.task_store.get_latest_task_by_hash(&task.hash()).await?;
        if let Some(latest) = &latest {
            if !latest.is_terminal() {
                debug!(task_id = %latest.id, status = %latest.status, "任务存储中的任务仍在处理");
                return Ok(true);
            }
            if now - latest.modified_at < grace_period {
                debug!(task_id = %latest.id, "任务存储中的上次运行仍在宽限期内");
                return Ok(true);
            }
        }

        let last_run = self
            .ctx
            .raw_data
            .get_last_run_boefje(&task.boefje.id, task.input_ooi.as_deref(), &task.organization)
            .await?;

        let Some(last_run) = last_run else {
            if latest.is_some() {
                warn!(boefje_id = %task.boefje.id, input_ooi = ?task.input_ooi, "任务已结束但原始数据服务中没有运行记录");
            }
            return Ok(false);
        };

        match (last_run.started_at, last_run.ended_at) {
            (Some(_), None) => {
                debug!(boefje_id = %task.boefje.id, "原始数据服务显示boefje仍在运行");
                Ok(true)
            }
            (_, Some(ended_at)) if now - ended_at < grace_period => {
                debug!(boefje_id = %task.boefje.id, "原始数据服务显示上次运行仍在宽限期内");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_boefjes_for_ooi(&self, ooi: &Ooi) -> Vec<Plugin> {
        match self
            .ctx
            .plugin_catalog
            .get_boefjes_by_type_and_org_id(&ooi.object_type, &self.organisation.id)
            .await
        {
            Ok(boefjes) => boefjes,
            Err(e) => {
                warn!(object_type = %ooi.object_type, error = %e, "获取对象类型的boefje失败");
                Vec::new()
            }
        }
    }

    /// 创建并入队；返回 false 表示队列已满，调用方应停止本轮填充
    async fn try_push(&self, boefje: &Plugin, ooi: &Ooi) -> bool {
        match self.create_and_push(boefje, ooi).await {
            Ok(_) => true,
            Err(e) if is_queue_full(&e) => {
                info!(scheduler_id = %self.scheduler.scheduler_id(), "队列已满，结束本轮填充");
                false
            }
            Err(e) => {
                warn!(
                    scheduler_id = %self.scheduler.scheduler_id(),
                    boefje_id = %boefje.id,
                    ooi = %ooi.primary_key,
                    error = %e,
                    "创建boefje任务失败"
                );
                true
            }
        }
    }

    /// 依次检查是否允许运行、是否仍在运行、是否到期、是否已在队列中，
    /// 都通过后入队；返回是否入队
    pub async fn create_and_push(&self, boefje: &Plugin, ooi: &Ooi) -> SchedulerResult<bool> {
        let task = BoefjeTask::new(
            Boefje::from(boefje),
            Some(ooi.primary_key.clone()),
            &self.organisation.id,
        );

        if !self.is_task_allowed_to_run(boefje, ooi) {
            return Ok(false);
        }

        if self.is_task_running(&task).await? {
            return Ok(false);
        }

        let Ranking::Due(priority) = self.ranker.rank(&task).await? else {
            debug!(boefje_id = %boefje.id, ooi = %ooi.primary_key, "尚未到期，跳过");
            return Ok(false);
        };

        let hash = task.hash();
        if self.scheduler.is_item_on_queue_by_hash(&hash) {
            debug!(boefje_id = %boefje.id, ooi = %ooi.primary_key, "任务已在队列中");
            return Ok(false);
        }

        let item = PrioritizedItem::from_task(self.scheduler.scheduler_id(), task.id, hash, priority, &task)?;
        self.scheduler
            .push_item_to_queue_with_timeout(item, self.scheduler.max_tries(), PUSH_TIMEOUT)
            .await?;
        Ok(true)
    }
}

impl SchedulingStrategy for BoefjeScheduler {
    fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    fn run(self: Arc<Self>) {
        if let Some(listener) = &self.listener {
            self.scheduler
                .register_listener("scan_profile_mutations", Arc::clone(listener));
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
