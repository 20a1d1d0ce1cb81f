//! 持久化存储抽象
//!
//! 可选的外部持久化接口。内存中的任务表始终是调度事实来源，
//! 镜像写入失败只记录日志，不影响内存状态转换。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{AnalysisBatch, AnalysisTask, TaskFilter};
use aqueue_errors::QueueResult;

/// 任务持久化抽象
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save_task(&self, task: &AnalysisTask) -> QueueResult<()>;
    async fn load_task(&self, task_id: &str) -> QueueResult<Option<AnalysisTask>>;
    async fn query_tasks(&self, filter: &TaskFilter) -> QueueResult<Vec<AnalysisTask>>;
    /// 清理指定时间之前到达终态的历史任务，返回删除数量
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> QueueResult<u64>;
}

/// 批次持久化抽象
#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn save_batch(&self, batch: &AnalysisBatch) -> QueueResult<()>;
    async fn load_batch(&self, batch_id: &str) -> QueueResult<Option<AnalysisBatch>>;
    async fn list_batches_by_user(&self, user_id: &str) -> QueueResult<Vec<AnalysisBatch>>;
}

/// 任务与批次的组合存储，调度器以此为镜像目标
pub trait QueueStore: TaskStore + BatchStore {}

impl<T: TaskStore + BatchStore> QueueStore for T {}
