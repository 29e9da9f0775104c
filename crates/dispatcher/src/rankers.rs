//! 任务排序
//!
//! 排序器把任务历史转换为优先级：数值越小越先出队。
//!
//! - `1`: 外部强制调度
//! - `2`: 从未运行过
//! - `3`: 已超期的下限
//! - `MAX_PRIORITY`: 刚刚过了宽限期

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{debug, warn};

use scheduler_core::{BoefjeTask, NormalizerTask, ObjectGraph, SchedulerResult, TaskStore};

pub const MAX_PRIORITY: i64 = 1000;
pub const MAX_DAYS: i64 = 7;
pub const PRIORITY_NEVER_RUN: i64 = 2;
pub const PRIORITY_OVERDUE: i64 = 3;

/// 参与排序前需要查看的历史运行数量
const HISTORY_DEPTH: usize = 10;

/// 排序结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ranking {
    /// 可以调度，携带优先级
    Due(i64),
    /// 仍在宽限期内，本轮不调度
    NotDue,
}

impl Ranking {
    pub fn priority(&self) -> Option<i64> {
        match self {
            Ranking::Due(priority) => Some(*priority),
            Ranking::NotDue => None,
        }
    }

    pub fn is_due(&self) -> bool {
        matches!(self, Ranking::Due(_))
    }
}

#[async_trait]
pub trait Ranker<T: Sync>: Send + Sync {
    async fn rank(&self, task: &T) -> SchedulerResult<Ranking>;
}

/// 按上次运行距今的时间衰减计算优先级
///
/// 没有运行记录返回 `Due(2)`；宽限期内返回 `NotDue`；超过 `MAX_DAYS`
/// 返回 `Due(3)`；其余在 `[3, MAX_PRIORITY]` 之间线性插值，越久越靠前。
pub fn recency_score(
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    grace_period: Duration,
) -> Ranking {
    let Some(last_run) = last_run else {
        return Ranking::Due(PRIORITY_NEVER_RUN);
    };

    let elapsed = (now - last_run - grace_period).num_milliseconds() as f64 / 1000.0;
    if elapsed < 0.0 {
        return Ranking::NotDue;
    }

    let window = (MAX_DAYS * 86_400) as f64;
    if elapsed >= window {
        return Ranking::Due(PRIORITY_OVERDUE);
    }

    let span = (MAX_PRIORITY - PRIORITY_OVERDUE) as f64;
    let score = PRIORITY_OVERDUE as f64 + span * (1.0 - elapsed / window);
    Ranking::Due(score.trunc() as i64)
}

/// boefje 任务的时间衰减排序器
pub struct BoefjeRanker {
    task_store: Arc<dyn TaskStore>,
    object_graph: Arc<dyn ObjectGraph>,
    grace_period: Duration,
}

impl BoefjeRanker {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        object_graph: Arc<dyn ObjectGraph>,
        grace_period: std::time::Duration,
    ) -> Self {
        Self {
            task_store,
            object_graph,
            grace_period: Duration::from_std(grace_period).unwrap_or(Duration::zero()),
        }
    }

    pub async fn rank_at(&self, task: &BoefjeTask, now: DateTime<Utc>) -> SchedulerResult<Ranking> {
        let hash = task.hash();
        let history = self.task_store.get_tasks_by_hash(&hash).await?;

        for prior in history.iter().take(HISTORY_DEPTH) {
            let Ok(prior_task) = prior.item.decode::<BoefjeTask>() else {
                continue;
            };
            let Some(input_ooi) = prior_task.input_ooi.as_deref() else {
                continue;
            };
            self.inspect_prior_run(&prior_task.organization, input_ooi).await;
        }

        let ranking = recency_score(history.first().map(|t| t.modified_at), now, self.grace_period);
        debug!(
            boefje_id = %task.boefje.id,
            input_ooi = ?task.input_ooi,
            prior_runs = history.len(),
            ?ranking,
            "boefje任务排序完成"
        );
        Ok(ranking)
    }

    /// 查看历史运行对象的子节点与发现项，只记录不参与打分
    async fn inspect_prior_run(&self, organisation_id: &str, input_ooi: &str) {
        match self
            .object_graph
            .get_children_by_ooi(organisation_id, input_ooi)
            .await
        {
            Ok(children) => debug!(input_ooi, children = children.len(), "历史运行对象的子节点"),
            Err(e) => warn!(input_ooi, error = %e, "查询历史运行对象的子节点失败"),
        }

        match self
            .object_graph
            .get_findings_by_ooi(organisation_id, input_ooi)
            .await
        {
            Ok(findings) => debug!(input_ooi, findings = findings.len(), "历史运行对象的发现项"),
            Err(e) => warn!(input_ooi, error = %e, "查询历史运行对象的发现项失败"),
        }
    }
}

#[async_trait]
impl Ranker<BoefjeTask> for BoefjeRanker {
    async fn rank(&self, task: &BoefjeTask) -> SchedulerResult<Ranking> {
        self.rank_at(task, Utc::now()).await
    }
}

/// 以随机的未来时间戳（Unix 秒）作为优先级
///
/// 取值范围 `[now + 1 天, now + 8 天]`。
#[derive(Debug, Default, Clone)]
pub struct BoefjeRankerTimeBased;

impl BoefjeRankerTimeBased {
    pub fn new() -> Self {
        Self
    }

    pub fn rank_at(&self, now: DateTime<Utc>) -> Ranking {
        let low = (now + Duration::days(1)).timestamp();
        let high = (now + Duration::days(1 + MAX_DAYS)).timestamp();
        Ranking::Due(rand::rng().random_range(low..=high))
    }
}

#[async_trait]
impl Ranker<BoefjeTask> for BoefjeRankerTimeBased {
    async fn rank(&self, _task: &BoefjeTask) -> SchedulerResult<Ranking> {
        Ok(self.rank_at(Utc::now()))
    }
}

/// 原始数据越早产出的 normalizer 任务越先处理
#[derive(Debug, Default, Clone)]
pub struct NormalizerRanker;

impl NormalizerRanker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Ranker<NormalizerTask> for NormalizerRanker {
    async fn rank(&self, task: &NormalizerTask) -> SchedulerResult<Ranking> {
        let produced_at = task.raw_data.boefje_meta.ended_at.unwrap_or_else(Utc::now);
        Ok(Ranking::Due(produced_at.timestamp()))
    }
}
