#[cfg(test)]
mod error_tests {
    use crate::*;

    #[test]
    fn test_queue_error_display() {
        let user_denied = QueueError::user_limit("user-1", 3);
        assert_eq!(user_denied.to_string(), "用户 user-1达到并发限制 (3)");

        let global_denied = QueueError::global_limit(50);
        assert_eq!(global_denied.to_string(), "系统全局达到并发限制 (50)");

        let task_error = QueueError::task_not_found("abc-123");
        assert_eq!(task_error.to_string(), "任务未找到: abc-123");

        let batch_error = QueueError::batch_not_found("batch-9");
        assert_eq!(batch_error.to_string(), "批次未找到: batch-9");

        let too_large = QueueError::BatchTooLarge { count: 120, max: 100 };
        assert_eq!(too_large.to_string(), "批次任务数 120 超过上限 100");

        let config_error = QueueError::config_error("缺少 queue 配置段");
        assert_eq!(config_error.to_string(), "配置错误: 缺少 queue 配置段");
    }

    #[test]
    fn test_is_retryable() {
        assert!(QueueError::global_limit(10).is_retryable());
        assert!(QueueError::persistence_error("disk full").is_retryable());
        assert!(!QueueError::task_not_found("x").is_retryable());
        assert!(!QueueError::invalid_input("empty symbols").is_retryable());
    }

    #[test]
    fn test_is_client_error() {
        assert!(QueueError::task_not_found("x").is_client_error());
        assert!(QueueError::BatchTooLarge { count: 5, max: 3 }.is_client_error());
        assert!(QueueError::InvalidState("批次已结束".to_string()).is_client_error());
        assert!(!QueueError::Internal("boom".to_string()).is_client_error());
        assert!(!QueueError::global_limit(10).is_client_error());
    }

    #[test]
    fn test_user_message() {
        assert_eq!(
            QueueError::user_limit("u", 3).user_message(),
            "并发任务数已达上限，请稍后重试"
        );
        assert_eq!(QueueError::task_not_found("x").user_message(), "请求的任务不存在");
        assert_eq!(
            QueueError::Internal("x".to_string()).user_message(),
            "系统繁忙，请稍后重试"
        );
    }

    #[test]
    fn test_from_sqlx_error() {
        let err: QueueError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, QueueError::Database(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: QueueError = json_err.into();
        assert!(matches!(err, QueueError::Serialization(_)));
    }
}
