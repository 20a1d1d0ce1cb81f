//! 领域事件
//!
//! 调度器产出的生命周期事件，供上层（REST/WebSocket 等）转发给客户端，
//! 调度器自身不关心事件如何被消费。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{BatchStatus, TaskPriority, TaskStatus};

/// 调度器对外广播的统一事件流
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    Task(TaskEvent),
    Batch(BatchEvent),
    Worker(WorkerEvent),
}

/// 领域事件基础trait
pub trait DomainEvent: Send + Sync {
    fn event_id(&self) -> Uuid;
    fn event_type(&self) -> &str;
    fn occurred_at(&self) -> DateTime<Utc>;
    fn aggregate_id(&self) -> String;
}

/// 任务相关事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEvent {
    TaskEnqueued {
        id: Uuid,
        task_id: String,
        user_id: String,
        symbol: String,
        priority: TaskPriority,
        occurred_at: DateTime<Utc>,
    },
    TaskDispatched {
        id: Uuid,
        task_id: String,
        worker_id: String,
        occurred_at: DateTime<Utc>,
    },
    TaskSettled {
        id: Uuid,
        task_id: String,
        status: TaskStatus,
        occurred_at: DateTime<Utc>,
    },
    TaskRequeued {
        id: Uuid,
        task_id: String,
        retry_count: u32,
        occurred_at: DateTime<Utc>,
    },
}

impl TaskEvent {
    pub fn enqueued(task_id: &str, user_id: &str, symbol: &str, priority: TaskPriority) -> Self {
        TaskEvent::TaskEnqueued {
            id: Uuid::new_v4(),
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            symbol: symbol.to_string(),
            priority,
            occurred_at: Utc::now(),
        }
    }

    pub fn dispatched(task_id: &str, worker_id: &str) -> Self {
        TaskEvent::TaskDispatched {
            id: Uuid::new_v4(),
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
            occurred_at: Utc::now(),
        }
    }

    pub fn settled(task_id: &str, status: TaskStatus) -> Self {
        TaskEvent::TaskSettled {
            id: Uuid::new_v4(),
            task_id: task_id.to_string(),
            status,
            occurred_at: Utc::now(),
        }
    }

    pub fn requeued(task_id: &str, retry_count: u32) -> Self {
        TaskEvent::TaskRequeued {
            id: Uuid::new_v4(),
            task_id: task_id.to_string(),
            retry_count,
            occurred_at: Utc::now(),
        }
    }
}

impl DomainEvent for TaskEvent {
    fn event_id(&self) -> Uuid {
        match self {
            TaskEvent::TaskEnqueued { id, .. } => *id,
            TaskEvent::TaskDispatched { id, .. } => *id,
            TaskEvent::TaskSettled { id, .. } => *id,
            TaskEvent::TaskRequeued { id, .. } => *id,
        }
    }

    fn event_type(&self) -> &str {
        match self {
            TaskEvent::TaskEnqueued { .. } => "TaskEnqueued",
            TaskEvent::TaskDispatched { .. } => "TaskDispatched",
            TaskEvent::TaskSettled { .. } => "TaskSettled",
            TaskEvent::TaskRequeued { .. } => "TaskRequeued",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TaskEvent::TaskEnqueued { occurred_at, .. } => *occurred_at,
            TaskEvent::TaskDispatched { occurred_at, .. } => *occurred_at,
            TaskEvent::TaskSettled { occurred_at, .. } => *occurred_at,
            TaskEvent::TaskRequeued { occurred_at, .. } => *occurred_at,
        }
    }

    fn aggregate_id(&self) -> String {
        match self {
            TaskEvent::TaskEnqueued { task_id, .. } => task_id.clone(),
            TaskEvent::TaskDispatched { task_id, .. } => task_id.clone(),
            TaskEvent::TaskSettled { task_id, .. } => task_id.clone(),
            TaskEvent::TaskRequeued { task_id, .. } => task_id.clone(),
        }
    }
}

/// 批次相关事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BatchEvent {
    BatchCreated {
        id: Uuid,
        batch_id: String,
        user_id: String,
        total_tasks: u32,
        occurred_at: DateTime<Utc>,
    },
    BatchFinalized {
        id: Uuid,
        batch_id: String,
        status: BatchStatus,
        completed_tasks: u32,
        failed_tasks: u32,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent for BatchEvent {
    fn event_id(&self) -> Uuid {
        match self {
            BatchEvent::BatchCreated { id, .. } => *id,
            BatchEvent::BatchFinalized { id, .. } => *id,
        }
    }

    fn event_type(&self) -> &str {
        match self {
            BatchEvent::BatchCreated { .. } => "BatchCreated",
            BatchEvent::BatchFinalized { .. } => "BatchFinalized",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BatchEvent::BatchCreated { occurred_at, .. } => *occurred_at,
            BatchEvent::BatchFinalized { occurred_at, .. } => *occurred_at,
        }
    }

    fn aggregate_id(&self) -> String {
        match self {
            BatchEvent::BatchCreated { batch_id, .. } => batch_id.clone(),
            BatchEvent::BatchFinalized { batch_id, .. } => batch_id.clone(),
        }
    }
}

/// Worker相关事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerEvent {
    WorkerRegistered {
        id: Uuid,
        worker_id: String,
        occurred_at: DateTime<Utc>,
    },
    WorkerUnregistered {
        id: Uuid,
        worker_id: String,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent for WorkerEvent {
    fn event_id(&self) -> Uuid {
        match self {
            WorkerEvent::WorkerRegistered { id, .. } => *id,
            WorkerEvent::WorkerUnregistered { id, .. } => *id,
        }
    }

    fn event_type(&self) -> &str {
        match self {
            WorkerEvent::WorkerRegistered { .. } => "WorkerRegistered",
            WorkerEvent::WorkerUnregistered { .. } => "WorkerUnregistered",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WorkerEvent::WorkerRegistered { occurred_at, .. } => *occurred_at,
            WorkerEvent::WorkerUnregistered { occurred_at, .. } => *occurred_at,
        }
    }

    fn aggregate_id(&self) -> String {
        match self {
            WorkerEvent::WorkerRegistered { worker_id, .. } => worker_id.clone(),
            WorkerEvent::WorkerUnregistered { worker_id, .. } => worker_id.clone(),
        }
    }
}
