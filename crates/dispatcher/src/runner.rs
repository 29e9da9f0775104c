use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use scheduler_core::SchedulerResult;

/// 后台工作的执行体：每次调用返回一次迭代的 future
pub type RunnerTarget = Arc<dyn Fn() -> BoxFuture<'static, SchedulerResult<()>> + Send + Sync>;

/// 按固定间隔重复执行 target 的后台工作者
///
/// 每次迭代之间检查停止信号。迭代返回错误或 panic 时只记录日志，循环继续。
/// `looping` 为 false 时只执行一次。
pub struct ThreadRunner {
    name: String,
    daemon: bool,
    handle: Option<JoinHandle<()>>,
}

impl ThreadRunner {
    pub fn start(
        name: impl Into<String>,
        target: RunnerTarget,
        mut stop_rx: watch::Receiver<bool>,
        interval: Duration,
        daemon: bool,
        looping: bool,
    ) -> Self {
        let name = name.into();
        let runner_name = name.clone();

        let handle = tokio::spawn(async move {
            debug!(runner = %runner_name, "后台工作者启动");
            loop {
                if *stop_rx.borrow() {
                    break;
                }

                let target = Arc::clone(&target);
                match AssertUnwindSafe(async move { target().await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(runner = %runner_name, error = %e, "后台工作者迭代失败");
                    }
                    Err(panic) => {
                        error!(
                            runner = %runner_name,
                            "后台工作者迭代发生panic: {}",
                            panic_message(panic.as_ref())
                        );
                    }
                }

                if !looping {
                    break;
                }

                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!(runner = %runner_name, "后台工作者退出");
        });

        Self {
            name,
            daemon,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// 等待工作者退出，最多 `timeout`；返回是否在期限内退出
    ///
    /// 超时后守护工作者会被中止，非守护工作者被放弃继续运行。
    pub async fn join(&mut self, timeout: Duration) -> bool {
        let Some(mut handle) = self.handle.take() else {
            return true;
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(runner = %self.name, error = %e, "后台工作者异常结束");
                true
            }
            Err(_) => {
                if self.daemon {
                    handle.abort();
                    warn!(runner = %self.name, ?timeout, "后台工作者未在期限内退出，已中止");
                } else {
                    warn!(runner = %self.name, ?timeout, "后台工作者未在期限内退出，放弃等待");
                }
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知panic".to_string()
    }
}

/// 把 async 闭包包装成 `RunnerTarget`
pub fn target<F, Fut>(f: F) -> RunnerTarget
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = SchedulerResult<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}
