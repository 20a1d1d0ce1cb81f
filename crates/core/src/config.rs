use aqueue_errors::{QueueError, QueueResult};
use serde::{Deserialize, Serialize};

/// 队列与调度配置
///
/// 所有字段均可通过配置文件覆盖，启动时加载一次。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 单用户并发处理中任务上限
    pub user_concurrent_limit: u32,
    /// 全局并发处理中任务上限
    pub global_concurrent_limit: u32,
    /// 可见性超时（秒），Worker 未在此时限内确认则任务重新入队
    pub visibility_timeout_seconds: u64,
    /// 租约扫描间隔（秒）
    pub sweep_interval_seconds: u64,
    /// 单个批次允许的最大股票数
    pub max_batch_size: usize,
    /// 租约过期重试上限。None 表示不设上限（至少一次投递直至成功）。
    /// 这是运维必须显式决定的策略，默认不封顶。
    pub max_retries: Option<u32>,
    /// 终态任务保留天数，超龄由清理循环删除
    pub task_cleanup_age_days: u32,
    /// Worker 心跳超时（秒），超时的注册信息被清理
    pub worker_heartbeat_timeout_seconds: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            user_concurrent_limit: 3,
            global_concurrent_limit: 50,
            visibility_timeout_seconds: 300,
            sweep_interval_seconds: 5,
            max_batch_size: 100,
            max_retries: None,
            task_cleanup_age_days: 7,
            worker_heartbeat_timeout_seconds: 90,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> QueueResult<()> {
        if self.user_concurrent_limit == 0 {
            return Err(QueueError::config_error("user_concurrent_limit 必须大于 0"));
        }
        if self.global_concurrent_limit == 0 {
            return Err(QueueError::config_error(
                "global_concurrent_limit 必须大于 0",
            ));
        }
        if self.user_concurrent_limit > self.global_concurrent_limit {
            return Err(QueueError::config_error(
                "user_concurrent_limit 不能大于 global_concurrent_limit",
            ));
        }
        if self.visibility_timeout_seconds == 0 {
            return Err(QueueError::config_error(
                "visibility_timeout_seconds 必须大于 0",
            ));
        }
        if self.max_batch_size == 0 {
            return Err(QueueError::config_error("max_batch_size 必须大于 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = QueueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.user_concurrent_limit, 3);
        assert_eq!(config.global_concurrent_limit, 50);
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = QueueConfig {
            user_concurrent_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = QueueConfig {
            visibility_timeout_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_user_limit_above_global() {
        let config = QueueConfig {
            user_concurrent_limit: 100,
            global_concurrent_limit: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
