use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{debug, info};

/// 单个调度器的指标
///
/// 所有指标都带 `scheduler_id` 标签；未安装全局 recorder 时这些调用是空操作。
pub struct MetricsCollector {
    scheduler_id: String,
    items_pushed_total: Counter,
    items_popped_total: Counter,
    queue_size: Gauge,
    populate_duration: Histogram,
}

impl MetricsCollector {
    pub fn new(scheduler_id: &str) -> Self {
        let labels = [("scheduler_id", scheduler_id.to_string())];
        Self {
            scheduler_id: scheduler_id.to_string(),
            items_pushed_total: counter!("scheduler_items_pushed_total", &labels),
            items_popped_total: counter!("scheduler_items_popped_total", &labels),
            queue_size: gauge!("scheduler_queue_size", &labels),
            populate_duration: histogram!("scheduler_populate_duration_seconds", &labels),
        }
    }

    pub fn scheduler_id(&self) -> &str {
        &self.scheduler_id
    }

    pub fn record_push(&self, qsize: usize) {
        self.items_pushed_total.increment(1);
        self.queue_size.set(qsize as f64);
    }

    pub fn record_pop(&self, qsize: usize) {
        self.items_popped_total.increment(1);
        self.queue_size.set(qsize as f64);
    }

    /// 入队被拒绝，`reason` 取 `not_allowed` / `queue_full` / `invalid`
    pub fn record_rejection(&self, reason: &'static str) {
        counter!(
            "scheduler_items_rejected_total",
            "scheduler_id" => self.scheduler_id.clone(),
            "reason" => reason
        )
        .increment(1);
        debug!(scheduler_id = %self.scheduler_id, reason, "条目入队被拒绝");
    }

    /// post_push 中某一步写存储失败
    pub fn record_persistence_failure(&self, step: &'static str) {
        counter!(
            "scheduler_persistence_failures_total",
            "scheduler_id" => self.scheduler_id.clone(),
            "step" => step
        )
        .increment(1);
    }

    pub fn set_queue_size(&self, qsize: usize) {
        self.queue_size.set(qsize as f64);
    }

    pub fn record_populate_duration(&self, duration: Duration) {
        self.populate_duration.record(duration.as_secs_f64());
    }
}

/// 安装 Prometheus 导出器，在 `bind_address` 上提供 `/metrics`
///
/// 需要在 tokio 运行时内调用。
pub fn init_metrics(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| anyhow::anyhow!("无效的指标监听地址 {}: {}", bind_address, e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Prometheus导出器初始化失败: {}", e))?;

    info!("指标导出器已启动: http://{}/metrics", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_without_recorder_is_noop() {
        let metrics = MetricsCollector::new("boefje-org1");
        metrics.record_push(1);
        metrics.record_pop(0);
        metrics.record_rejection("queue_full");
        metrics.record_persistence_failure("create_task");
        metrics.record_populate_duration(Duration::from_millis(5));
        assert_eq!(metrics.scheduler_id(), "boefje-org1");
    }

    #[test]
    fn test_invalid_bind_address() {
        assert!(init_metrics("not-an-address").is_err());
    }
}
