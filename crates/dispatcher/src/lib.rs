//! 按组织调度扫描（boefje）与后处理（normalizer）任务
//!
//! - `runner`: 带停止信号的后台工作者
//! - `rankers`: 任务排序
//! - `scheduler`: 队列、存储与后台工作者的组合
//! - `boefje` / `normalizer`: 具体调度策略
//! - `set`: 调度器集合

pub mod boefje;
pub mod context;
pub mod normalizer;
pub mod rankers;
pub mod runner;
pub mod scheduler;
pub mod set;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use boefje::BoefjeScheduler;
pub use context::AppContext;
pub use normalizer::NormalizerScheduler;
pub use rankers::{
    BoefjeRanker, BoefjeRankerTimeBased, NormalizerRanker, Ranker, Ranking, MAX_DAYS, MAX_PRIORITY,
};
pub use runner::{RunnerTarget, ThreadRunner};
pub use scheduler::{
    Scheduler, SchedulerState, SchedulerStatus, SchedulingStrategy, StopCallback,
};
pub use set::SchedulerSet;
