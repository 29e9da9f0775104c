use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use scheduler_core::{
    AppConfig, EventSource, Listener, Organisation, RawDataReceived, ScanProfileMutation,
};
use scheduler_dispatcher::{
    AppContext, BoefjeScheduler, NormalizerScheduler, SchedulerSet, SchedulingStrategy,
    StopCallback,
};
use scheduler_infrastructure::listeners::{raw_file_received_queue, scan_profile_mutations_queue};
use scheduler_infrastructure::{
    create_stores, AmqpListener, BytesClient, KatalogusClient, MemoryEventSource, OctopoesClient,
};

/// 调度服务
///
/// 周期性地从插件目录拉取组织列表，为每个组织维护一个 boefje 调度器
/// 和一个 normalizer 调度器。
pub struct Application {
    ctx: AppContext,
    octopoes: Option<Arc<OctopoesClient>>,
    schedulers: Arc<SchedulerSet>,
    stopped_tx: mpsc::UnboundedSender<String>,
    stopped_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化调度服务");

        let (task_store, job_store) = create_stores(&config.database)
            .await
            .context("创建任务存储失败")?;

        let octopoes =
            Arc::new(OctopoesClient::from_config(&config.services).context("创建octopoes客户端失败")?);
        let katalogus =
            Arc::new(KatalogusClient::from_config(&config.services).context("创建katalogus客户端失败")?);
        let bytes =
            Arc::new(BytesClient::from_config(&config.services).context("创建bytes客户端失败")?);

        let ctx = AppContext::new(
            config,
            task_store,
            job_store,
            octopoes.clone(),
            katalogus,
            bytes,
        );

        let mut app = Self::from_context(ctx);
        app.octopoes = Some(octopoes);
        Ok(app)
    }

    /// 用现成的协作方构建，不连接任何外部服务
    pub fn from_context(ctx: AppContext) -> Self {
        let (stopped_tx, stopped_rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            octopoes: None,
            schedulers: Arc::new(SchedulerSet::new()),
            stopped_tx,
            stopped_rx: tokio::sync::Mutex::new(stopped_rx),
        }
    }

    pub fn schedulers(&self) -> &Arc<SchedulerSet> {
        &self.schedulers
    }

    /// 运行组织监视循环直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let interval = self.ctx.config.scheduler.monitor_organisations_interval();
        info!(interval_secs = interval.as_secs(), "调度服务启动");

        loop {
            self.reap_stopped().await;

            if let Err(e) = self.monitor_organisations().await {
                error!(error = %e, "更新组织列表失败");
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("调度服务收到关闭信号");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.schedulers.stop_all().await;
        info!("所有调度器已停止");
        Ok(())
    }

    /// 让调度器集合与插件目录中的组织保持一致
    pub async fn monitor_organisations(&self) -> Result<()> {
        let organisations = self
            .ctx
            .plugin_catalog
            .get_organisations()
            .await
            .context("获取组织列表失败")?;

        if let Some(octopoes) = &self.octopoes {
            octopoes.set_organisations(organisations.clone());
        }

        let wanted: HashSet<String> = organisations
            .iter()
            .flat_map(|org| [boefje_scheduler_id(org), normalizer_scheduler_id(org)])
            .collect();

        for id in self.schedulers.ids().await {
            if !wanted.contains(&id) {
                info!(scheduler_id = %id, "组织已移除，停止调度器");
                self.schedulers.remove(&id).await;
            }
        }

        for organisation in &organisations {
            if !self.schedulers.contains(&boefje_scheduler_id(organisation)).await {
                let strategy = self.boefje_scheduler(organisation.clone());
                self.schedulers.add(strategy).await;
            }
            if !self
                .schedulers
                .contains(&normalizer_scheduler_id(organisation))
                .await
            {
                let strategy = self.normalizer_scheduler(organisation.clone());
                self.schedulers.add(strategy).await;
            }
        }

        let scheduler_count = self.schedulers.len().await;
        debug!(
            organisations = organisations.len(),
            schedulers = scheduler_count,
            "组织列表已同步"
        );
        Ok(())
    }

    /// 从集合中移除已经自行停止的调度器
    async fn reap_stopped(&self) {
        let mut stopped_rx = self.stopped_rx.lock().await;
        while let Ok(id) = stopped_rx.try_recv() {
            if self.schedulers.forget(&id).await.is_some() {
                debug!(scheduler_id = %id, "已移除停止的调度器");
            }
        }
    }

    fn stop_callback(&self) -> StopCallback {
        let tx = self.stopped_tx.clone();
        Box::new(move |scheduler_id: String| {
            let _ = tx.send(scheduler_id);
        })
    }

    fn boefje_scheduler(&self, organisation: Organisation) -> Arc<dyn SchedulingStrategy> {
        let buffer = Arc::new(self.event_buffer::<ScanProfileMutation>());
        let queue = scan_profile_mutations_queue(&organisation.id);
        let listener = self.amqp_listener(&queue, Arc::clone(&buffer));
        let events: Arc<dyn EventSource<ScanProfileMutation>> = buffer;

        let mut scheduler = BoefjeScheduler::new(self.ctx.clone(), organisation, events)
            .with_callback(self.stop_callback());
        if let Some(listener) = listener {
            scheduler = scheduler.with_listener(listener);
        }
        Arc::new(scheduler)
    }

    fn normalizer_scheduler(&self, organisation: Organisation) -> Arc<dyn SchedulingStrategy> {
        let buffer = Arc::new(self.event_buffer::<RawDataReceived>());
        let queue = raw_file_received_queue(&organisation.id);
        let listener = self.amqp_listener(&queue, Arc::clone(&buffer));
        let events: Arc<dyn EventSource<RawDataReceived>> = buffer;

        let mut scheduler = NormalizerScheduler::new(self.ctx.clone(), organisation, events)
            .with_callback(self.stop_callback());
        if let Some(listener) = listener {
            scheduler = scheduler.with_listener(listener);
        }
        Arc::new(scheduler)
    }

    /// 容量与 prefetch 一致，缓冲区满时监听器停止确认消息
    fn event_buffer<T>(&self) -> MemoryEventSource<T> {
        MemoryEventSource::with_capacity(usize::from(self.ctx.config.message_queue.prefetch_count))
    }

    /// 未启用消息队列时事件只能通过内存缓冲投递
    fn amqp_listener<T>(
        &self,
        queue: &str,
        buffer: Arc<MemoryEventSource<T>>,
    ) -> Option<Arc<dyn Listener>>
    where
        T: serde::de::DeserializeOwned + Send + Sync + 'static,
    {
        let config = &self.ctx.config.message_queue;
        if !config.enabled {
            return None;
        }
        if config.url.is_empty() {
            warn!(queue, "消息队列地址为空，跳过监听");
            return None;
        }
        Some(Arc::new(
            AmqpListener::new(&config.url, queue, buffer).with_prefetch_count(config.prefetch_count),
        ))
    }
}

fn boefje_scheduler_id(organisation: &Organisation) -> String {
    format!("boefje-{}", organisation.id)
}

fn normalizer_scheduler_id(organisation: &Organisation) -> String {
    format!("normalizer-{}", organisation.id)
}
