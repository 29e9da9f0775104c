use thiserror::Error;

/// 优先级队列层错误
///
/// 这四类错误由队列直接抛出，调度器原样向调用方传播，
/// 只有批量推送 (`push_items_to_queue`) 会逐条吸收前三类。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("队列策略不允许推送: {0}")]
    NotAllowed(String),
    #[error("队列已满: {0}")]
    QueueFull(String),
    #[error("无效的优先级队列条目: {0}")]
    InvalidPrioritizedItem(String),
    #[error("队列为空: {0}")]
    QueueEmpty(String),
}

impl QueueError {
    /// 批量推送时可以跳过、不中断整批处理的错误
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            QueueError::NotAllowed(_)
                | QueueError::QueueFull(_)
                | QueueError::InvalidPrioritizedItem(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("存储操作错误: {0}")]
    Store(String),
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("外部服务 {service} 调用失败: {message}")]
    Connector { service: String, message: String },
    #[error("外部服务 {service} 无法连接: {message}")]
    ServiceUnavailable { service: String, message: String },
    #[error("消息队列错误: {0}")]
    MessageQueue(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn store_error<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }
    pub fn connector<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::Connector {
            service: service.into(),
            message: message.into(),
        }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }

    /// 取出队列层错误（如果是的话）
    pub fn as_queue_error(&self) -> Option<&QueueError> {
        match self {
            SchedulerError::Queue(e) => Some(e),
            _ => None,
        }
    }

    /// 连接失败、超时和消息队列错误可以重试；外部服务返回的错误响应不重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::ServiceUnavailable { .. }
                | SchedulerError::Timeout(_)
                | SchedulerError::MessageQueue(_)
        )
    }

    /// 按 HTTP 传输层错误的种类归类
    pub fn from_request_error(service: impl Into<String>, err: &reqwest::Error) -> Self {
        let service = service.into();
        if err.is_timeout() {
            SchedulerError::Timeout(format!("{service}: {err}"))
        } else if err.is_connect() {
            SchedulerError::ServiceUnavailable {
                service,
                message: err.to_string(),
            }
        } else {
            SchedulerError::Connector {
                service,
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for SchedulerError {
    fn from(err: reqwest::Error) -> Self {
        let service = err
            .url()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        SchedulerError::from_request_error(service, &err)
    }
}

#[cfg(test)]
mod tests;
