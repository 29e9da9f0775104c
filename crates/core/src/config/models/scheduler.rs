use serde::{Deserialize, Serialize};
use std::time::Duration;

/// boefje 调度器使用的排序策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoefjeRankerKind {
    /// 按距离上次运行的时间衰减
    #[default]
    RecencyDecay,
    /// 随机安排在未来 1-8 天内
    TimeBased,
}

/// 队列与填充循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 队列容量，0 表示不限
    pub pq_maxsize: usize,
    pub pq_populate_interval_seconds: u64,
    /// 同一逻辑任务两次运行之间的最短间隔
    pub pq_populate_grace_period_seconds: u64,
    pub pq_populate_max_random_objects: usize,
    /// 带超时入队的重试次数，-1 表示一直等待
    pub max_tries: i64,
    pub monitor_organisations_interval_seconds: u64,
    pub populate_queue_enabled: bool,
    pub boefje_ranker: BoefjeRankerKind,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pq_maxsize: 1000,
            pq_populate_interval_seconds: 60,
            pq_populate_grace_period_seconds: 86400,
            pq_populate_max_random_objects: 50,
            max_tries: 10,
            monitor_organisations_interval_seconds: 60,
            populate_queue_enabled: true,
            boefje_ranker: BoefjeRankerKind::RecencyDecay,
        }
    }
}

impl SchedulerConfig {
    pub fn populate_interval(&self) -> Duration {
        Duration::from_secs(self.pq_populate_interval_seconds)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.pq_populate_grace_period_seconds)
    }

    pub fn monitor_organisations_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_organisations_interval_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pq_populate_interval_seconds == 0 {
            return Err(anyhow::anyhow!("队列填充间隔必须大于0"));
        }

        if self.monitor_organisations_interval_seconds == 0 {
            return Err(anyhow::anyhow!("组织监控间隔必须大于0"));
        }

        if self.max_tries == 0 || self.max_tries < -1 {
            return Err(anyhow::anyhow!("max_tries 必须为正数或 -1"));
        }

        Ok(())
    }
}
