use crate::*;

#[test]
fn test_queue_error_display() {
    let err = QueueError::QueueFull("boefje-org1".to_string());
    assert_eq!(err.to_string(), "队列已满: boefje-org1");

    let err = QueueError::NotAllowed("hash abc 已在队列中".to_string());
    assert_eq!(err.to_string(), "队列策略不允许推送: hash abc 已在队列中");
}

#[test]
fn test_queue_error_is_transparent_inside_scheduler_error() {
    let err: SchedulerError = QueueError::QueueEmpty("q".to_string()).into();
    assert_eq!(err.to_string(), "队列为空: q");
    assert_eq!(
        err.as_queue_error(),
        Some(&QueueError::QueueEmpty("q".to_string()))
    );
}

#[test]
fn test_skippable_queue_errors() {
    assert!(QueueError::NotAllowed(String::new()).is_skippable());
    assert!(QueueError::QueueFull(String::new()).is_skippable());
    assert!(QueueError::InvalidPrioritizedItem(String::new()).is_skippable());
    assert!(!QueueError::QueueEmpty(String::new()).is_skippable());
}

#[test]
fn test_scheduler_error_display() {
    let err = SchedulerError::connector("octopoes", "connection refused");
    assert_eq!(err.to_string(), "外部服务 octopoes 调用失败: connection refused");

    let err = SchedulerError::task_not_found("42");
    assert_eq!(err.to_string(), "任务未找到: 42");

    let err = SchedulerError::store_error("disk full");
    assert_eq!(err.to_string(), "存储操作错误: disk full");
}

#[test]
fn test_error_classification() {
    assert!(SchedulerError::Timeout("octopoes".into()).is_retryable());
    assert!(SchedulerError::ServiceUnavailable {
        service: "bytes".into(),
        message: "connection refused".into(),
    }
    .is_retryable());
    assert!(SchedulerError::MessageQueue("x".into()).is_retryable());

    assert!(!SchedulerError::connector("bytes", "500").is_retryable());
    assert!(!SchedulerError::store_error("x").is_retryable());
    assert!(!SchedulerError::validation_error("x").is_retryable());
    assert!(!SchedulerError::from(QueueError::QueueFull("q".into())).is_retryable());
}

#[test]
fn test_from_serde_json_error() {
    let json_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
    let err: SchedulerError = json_err.into();
    assert!(matches!(err, SchedulerError::Serialization(_)));
}

#[test]
fn test_from_anyhow_error() {
    let err: SchedulerError = anyhow::anyhow!("boom").into();
    assert!(matches!(err, SchedulerError::Internal(ref m) if m == "boom"));
}
