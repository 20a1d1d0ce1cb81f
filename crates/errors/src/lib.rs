use thiserror::Error;

#[cfg(test)]
mod tests;

/// 准入控制的限流范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionScope {
    /// 单个用户达到并发上限
    User(String),
    /// 系统全局达到并发上限
    Global,
}

impl std::fmt::Display for AdmissionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionScope::User(user_id) => write!(f, "用户 {user_id}"),
            AdmissionScope::Global => write!(f, "系统全局"),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{scope}达到并发限制 ({limit})")]
    AdmissionDenied { scope: AdmissionScope, limit: u32 },
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("批次未找到: {id}")]
    BatchNotFound { id: String },
    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },
    #[error("无效的状态转换: {0}")]
    InvalidState(String),
    #[error("无效的输入参数: {0}")]
    InvalidInput(String),
    #[error("批次任务数 {count} 超过上限 {max}")]
    BatchTooLarge { count: usize, max: usize },
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("持久化存储错误: {0}")]
    Persistence(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

impl QueueError {
    pub fn user_limit<S: Into<String>>(user_id: S, limit: u32) -> Self {
        Self::AdmissionDenied {
            scope: AdmissionScope::User(user_id.into()),
            limit,
        }
    }
    pub fn global_limit(limit: u32) -> Self {
        Self::AdmissionDenied {
            scope: AdmissionScope::Global,
            limit,
        }
    }
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }
    pub fn batch_not_found<S: Into<String>>(id: S) -> Self {
        Self::BatchNotFound { id: id.into() }
    }
    pub fn worker_not_found<S: Into<String>>(id: S) -> Self {
        Self::WorkerNotFound { id: id.into() }
    }
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn persistence_error<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }

    /// 调用方收到该错误后是否应当稍后重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::AdmissionDenied { .. }
                | QueueError::Database(_)
                | QueueError::Persistence(_)
        )
    }

    /// 是否属于调用方输入问题（而非系统故障）
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            QueueError::TaskNotFound { .. }
                | QueueError::BatchNotFound { .. }
                | QueueError::WorkerNotFound { .. }
                | QueueError::InvalidState(_)
                | QueueError::InvalidInput(_)
                | QueueError::BatchTooLarge { .. }
        )
    }

    pub fn user_message(&self) -> &str {
        match self {
            QueueError::AdmissionDenied { .. } => "并发任务数已达上限，请稍后重试",
            QueueError::TaskNotFound { .. } => "请求的任务不存在",
            QueueError::BatchNotFound { .. } => "请求的批次不存在",
            QueueError::WorkerNotFound { .. } => "请求的Worker节点不存在",
            QueueError::InvalidInput(_) => "输入参数有误",
            QueueError::BatchTooLarge { .. } => "批次包含的股票数量超过上限",
            QueueError::InvalidState(_) => "任务状态不允许该操作",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Internal(err.to_string())
    }
}
