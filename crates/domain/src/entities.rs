use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务优先级，数值越大越先出队
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    #[serde(rename = "low")]
    Low = 0,
    #[serde(rename = "normal")]
    Normal = 1,
    #[serde(rename = "high")]
    High = 2,
    #[serde(rename = "urgent")]
    Urgent = 3,
}

impl TaskPriority {
    /// 优先级档位总数（优先级队列按档位分桶）
    pub const BANDS: usize = 4;

    pub fn band(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(TaskPriority::Low),
            "normal" => Some(TaskPriority::Normal),
            "high" => Some(TaskPriority::High),
            "urgent" => Some(TaskPriority::Urgent),
            _ => None,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(TaskStatus::Queued),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

/// 一只股票的分析任务，调度的最小单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    /// 透传给分析引擎的参数，调度器不解释其内容
    pub parameters: serde_json::Value,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub batch_id: Option<String>,
    /// 仅在 processing 状态下有值
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub requeued_at: Option<DateTime<Utc>>,
    /// 租约过期被重新入队的次数，只增不减
    pub retry_count: u32,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl AnalysisTask {
    pub fn new(
        user_id: String,
        symbol: String,
        parameters: serde_json::Value,
        priority: TaskPriority,
        batch_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            symbol,
            parameters,
            priority,
            status: TaskStatus::Queued,
            batch_id,
            worker_id: None,
            created_at: now,
            enqueued_at: now,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            requeued_at: None,
            retry_count: 0,
            result: None,
            error_message: None,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self.status, TaskStatus::Queued)
    }

    pub fn is_processing(&self) -> bool {
        matches!(self.status, TaskStatus::Processing)
    }

    /// 终态任务除审计字段外不可再变更
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn entity_description(&self) -> String {
        format!(
            "分析任务 '{}' (ID: {}, 用户: {})",
            self.symbol, self.id, self.user_id
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BatchStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BatchStatus::Pending),
            "processing" => Some(BatchStatus::Processing),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            "cancelled" => Some(BatchStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }
}

/// 一次性创建的一组分析任务，跟踪聚合进度
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisBatch {
    pub id: String,
    pub user_id: String,
    /// 成员任务 id，顺序与提交的股票列表一致；批次未结束前
    /// 可由带 batch_id 的入队操作追加
    pub task_ids: Vec<String>,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub cancelled_tasks: u32,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisBatch {
    pub fn new(user_id: String, task_ids: Vec<String>) -> Self {
        let total = task_ids.len() as u32;
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            task_ids,
            total_tasks: total,
            completed_tasks: 0,
            failed_tasks: 0,
            cancelled_tasks: 0,
            status: BatchStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// 整数百分比进度 = round((completed+failed)/total*100)
    pub fn progress(&self) -> u32 {
        if self.total_tasks == 0 {
            return 100;
        }
        let done = (self.completed_tasks + self.failed_tasks) as f64;
        (done / self.total_tasks as f64 * 100.0).round() as u32
    }

    /// 所有成员均到达终态
    pub fn all_settled(&self) -> bool {
        self.completed_tasks + self.failed_tasks + self.cancelled_tasks >= self.total_tasks
    }

    pub fn entity_description(&self) -> String {
        format!(
            "分析批次 (ID: {}, 用户: {}, 任务数: {})",
            self.id, self.user_id, self.total_tasks
        )
    }
}

/// 批次状态快照，供调用方轮询
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatusSnapshot {
    pub batch_id: String,
    pub status: BatchStatus,
    pub progress: u32,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub cancelled_tasks: u32,
    pub task_ids: Vec<String>,
}

impl From<&AnalysisBatch> for BatchStatusSnapshot {
    fn from(batch: &AnalysisBatch) -> Self {
        Self {
            batch_id: batch.id.clone(),
            status: batch.status,
            progress: batch.progress(),
            total_tasks: batch.total_tasks,
            completed_tasks: batch.completed_tasks,
            failed_tasks: batch.failed_tasks,
            cancelled_tasks: batch.cancelled_tasks,
            task_ids: batch.task_ids.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkerStatus {
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "busy")]
    Busy,
}

/// Worker 注册信息，仅用于观测，不参与调度决策
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    /// 分析引擎类型，如 "trading-agents"
    pub worker_type: String,
    pub status: WorkerStatus,
    pub current_task_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub tasks_processed: u64,
    pub started_at: DateTime<Utc>,
}

impl WorkerInfo {
    pub fn new(id: String, worker_type: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            worker_type,
            status: WorkerStatus::Idle,
            current_task_id: None,
            last_heartbeat: now,
            tasks_processed: 0,
            started_at: now,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.status, WorkerStatus::Idle)
    }

    pub fn update_heartbeat(&mut self, current_task_id: Option<String>) {
        self.last_heartbeat = Utc::now();
        self.status = if current_task_id.is_some() {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Idle
        };
        self.current_task_id = current_task_id;
    }

    pub fn is_heartbeat_expired(&self, timeout_seconds: i64) -> bool {
        (Utc::now() - self.last_heartbeat).num_seconds() > timeout_seconds
    }
}

/// 任务查询条件（持久化存储的 query 接口使用）
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub user_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub batch_id: Option<String>,
    pub symbol: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_priority_ordering() {
        assert!(TaskPriority::Urgent > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
        assert_eq!(TaskPriority::Low.band(), 0);
        assert_eq!(TaskPriority::Urgent.band(), 3);
    }

    #[test]
    fn test_task_lifecycle_predicates() {
        let mut task = AnalysisTask::new(
            "user-1".to_string(),
            "AAPL".to_string(),
            serde_json::json!({"depth": "full"}),
            TaskPriority::Normal,
            None,
        );
        assert!(task.is_queued());
        assert!(!task.is_terminal());
        assert!(task.worker_id.is_none());

        task.status = TaskStatus::Processing;
        assert!(task.is_processing());
        assert!(!task.is_terminal());

        task.status = TaskStatus::Completed;
        assert!(task.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("unknown"), None);
    }

    #[test]
    fn test_batch_progress() {
        let mut batch = AnalysisBatch::new(
            "user-1".to_string(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
        );
        assert_eq!(batch.total_tasks, 3);
        assert_eq!(batch.progress(), 0);
        assert!(!batch.all_settled());

        batch.completed_tasks = 1;
        assert_eq!(batch.progress(), 33);

        batch.completed_tasks = 2;
        batch.failed_tasks = 1;
        assert_eq!(batch.progress(), 100);
        assert!(batch.all_settled());
    }

    #[test]
    fn test_batch_settled_with_cancelled_members() {
        let mut batch = AnalysisBatch::new(
            "user-1".to_string(),
            vec!["a".to_string(), "b".to_string()],
        );
        batch.completed_tasks = 1;
        batch.cancelled_tasks = 1;
        assert!(batch.all_settled());
        // 取消的成员不计入进度公式
        assert_eq!(batch.progress(), 50);
    }

    #[test]
    fn test_worker_heartbeat() {
        let mut worker = WorkerInfo::new("w-1".to_string(), "trading-agents".to_string());
        assert!(worker.is_idle());
        assert!(!worker.is_heartbeat_expired(60));

        worker.update_heartbeat(Some("task-1".to_string()));
        assert!(!worker.is_idle());
        assert_eq!(worker.current_task_id.as_deref(), Some("task-1"));

        worker.update_heartbeat(None);
        assert!(worker.is_idle());
        assert!(worker.current_task_id.is_none());
    }
}
