//! Worker注册表
//!
//! 纯观测用途：记录已知 Worker、最近心跳与当前分配的任务，供运维
//! 发现"有心跳但不拉活"或"拉活但心跳消失"的 Worker。注册表不参与
//! 调度决策——失联 Worker 持有的任务由租约扫描回收，与心跳无关。
//! 允许短暂陈旧，因此使用独立的读写锁而非调度器的状态锁。

use std::collections::HashMap;

use aqueue_domain::{WorkerInfo, WorkerStatus};
use aqueue_errors::{QueueError, QueueResult};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerInfo>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 Worker，重复注册视为重启并重置信息
    pub async fn register(&self, worker_id: &str, worker_type: &str) -> WorkerInfo {
        let info = WorkerInfo::new(worker_id.to_string(), worker_type.to_string());
        let mut workers = self.workers.write().await;
        if workers.insert(worker_id.to_string(), info.clone()).is_some() {
            info!("Worker {} 重新注册，原有信息被重置", worker_id);
        } else {
            info!("Worker {} 已注册 (类型: {})", worker_id, worker_type);
        }
        info
    }

    /// 刷新心跳并上报当前任务
    pub async fn heartbeat(
        &self,
        worker_id: &str,
        current_task_id: Option<String>,
    ) -> QueueResult<()> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| QueueError::worker_not_found(worker_id))?;
        worker.update_heartbeat(current_task_id);
        debug!("Worker {} 心跳已刷新", worker_id);
        Ok(())
    }

    pub async fn unregister(&self, worker_id: &str) -> bool {
        let removed = self.workers.write().await.remove(worker_id).is_some();
        if removed {
            info!("Worker {} 已注销", worker_id);
        }
        removed
    }

    pub async fn get(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.workers.read().await.get(worker_id).cloned()
    }

    pub async fn list(&self) -> Vec<WorkerInfo> {
        self.workers.read().await.values().cloned().collect()
    }

    /// 调度器出队成功后记录分配关系
    pub(crate) async fn mark_assigned(&self, worker_id: &str, task_id: &str) {
        let mut workers = self.workers.write().await;
        if let Some(worker) = workers.get_mut(worker_id) {
            worker.status = WorkerStatus::Busy;
            worker.current_task_id = Some(task_id.to_string());
        }
    }

    /// 任务离开该 Worker（确认/取消/租约回收）后清除分配关系
    pub(crate) async fn mark_finished(&self, worker_id: &str, task_id: &str, processed: bool) {
        let mut workers = self.workers.write().await;
        if let Some(worker) = workers.get_mut(worker_id) {
            if worker.current_task_id.as_deref() == Some(task_id) {
                worker.status = WorkerStatus::Idle;
                worker.current_task_id = None;
            }
            if processed {
                worker.tasks_processed += 1;
            }
        }
    }

    /// 移除心跳超时的注册信息，返回被移除的 Worker id
    pub async fn remove_stale(&self, timeout_seconds: i64) -> Vec<String> {
        let mut workers = self.workers.write().await;
        let stale: Vec<String> = workers
            .values()
            .filter(|w| w.is_heartbeat_expired(timeout_seconds))
            .map(|w| w.id.clone())
            .collect();
        for worker_id in &stale {
            workers.remove(worker_id);
            warn!("Worker {} 心跳超时，注册信息已清理", worker_id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_register_and_heartbeat() {
        let registry = WorkerRegistry::new();
        let info = registry.register("w-1", "trading-agents").await;
        assert_eq!(info.id, "w-1");
        assert!(info.is_idle());

        registry
            .heartbeat("w-1", Some("task-1".to_string()))
            .await
            .unwrap();
        let worker = registry.get("w-1").await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Busy);
        assert_eq!(worker.current_task_id.as_deref(), Some("task-1"));
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_worker() {
        let registry = WorkerRegistry::new();
        let err = registry.heartbeat("ghost", None).await.unwrap_err();
        assert!(matches!(err, QueueError::WorkerNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = WorkerRegistry::new();
        registry.register("w-1", "trading-agents").await;
        assert!(registry.unregister("w-1").await);
        assert!(!registry.unregister("w-1").await);
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_stale() {
        let registry = WorkerRegistry::new();
        registry.register("fresh", "trading-agents").await;
        registry.register("stale", "trading-agents").await;

        // 手动把一个 Worker 的心跳拨回过去
        {
            let mut workers = registry.workers.write().await;
            workers.get_mut("stale").unwrap().last_heartbeat =
                chrono::Utc::now() - Duration::seconds(600);
        }

        let removed = registry.remove_stale(90).await;
        assert_eq!(removed, vec!["stale"]);
        assert!(registry.get("fresh").await.is_some());
        assert!(registry.get("stale").await.is_none());
    }

    #[tokio::test]
    async fn test_mark_assigned_and_finished() {
        let registry = WorkerRegistry::new();
        registry.register("w-1", "trading-agents").await;

        registry.mark_assigned("w-1", "task-1").await;
        let worker = registry.get("w-1").await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Busy);

        registry.mark_finished("w-1", "task-1", true).await;
        let worker = registry.get("w-1").await.unwrap();
        assert!(worker.is_idle());
        assert_eq!(worker.tasks_processed, 1);

        // 已分配其他任务时不误清
        registry.mark_assigned("w-1", "task-2").await;
        registry.mark_finished("w-1", "task-1", false).await;
        let worker = registry.get("w-1").await.unwrap();
        assert_eq!(worker.current_task_id.as_deref(), Some("task-2"));
    }
}
