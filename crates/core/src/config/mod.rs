//! 调度器配置
//!
//! 加载顺序：
//! 1. 各配置段的默认值
//! 2. TOML 配置文件
//! 3. 环境变量覆盖（前缀 `SCHEDULER_`，层级分隔符 `__`，
//!    例如 `SCHEDULER_SCHEDULER__PQ_MAXSIZE=500`）

pub mod models;

pub use models::*;
