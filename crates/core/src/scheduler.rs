//! 调度器门面
//!
//! 对外暴露 enqueue/dequeue/ack/cancel/批次/统计 操作，把任务表、批次表、
//! 优先级队列、准入计数与租约表组合成原子操作。这五者的不变式相互耦合
//! （出队依赖实时准入计数，确认依赖实时任务状态），因此放在同一把锁内，
//! 而不是各自独立加锁。Worker注册表仅供观测，容忍陈旧，单独加锁。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use aqueue_domain::{
    AnalysisBatch, AnalysisTask, BatchEvent, BatchStatus, BatchStatusSnapshot, QueueEvent,
    QueueStore, TaskEvent, TaskPriority, TaskStatus, WorkerEvent, WorkerInfo,
};
use aqueue_errors::{QueueError, QueueResult};
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::config::QueueConfig;
use crate::lease::LeaseManager;
use crate::priority_queue::PriorityQueue;
use crate::worker_registry::WorkerRegistry;

/// 任务生命周期统计快照
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total: u64,
}

/// 在任务统计之上叠加批次维度
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchQueueStats {
    #[serde(flatten)]
    pub tasks: QueueStats,
    pub active_batches: u64,
    pub completed_batches: u64,
    pub pending_batches: u64,
}

/// 单用户并发占用情况
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQueueStatus {
    pub processing: u32,
    pub concurrent_limit: u32,
    pub available_slots: u32,
}

/// 任务队列服务接口
///
/// 调度器的全部公开操作。实现必须保证各操作间的并发安全，
/// 以及对同一任务的重复确认/取消是幂等的无操作。
#[async_trait]
pub trait TaskQueueService: Send + Sync {
    /// 任务入队。并发上限已满时返回 AdmissionDenied 给生产者即时背压。
    async fn enqueue_task(
        &self,
        user_id: &str,
        symbol: &str,
        parameters: serde_json::Value,
        priority: TaskPriority,
        batch_id: Option<String>,
    ) -> QueueResult<String>;

    /// 取出最高优先级的就绪任务。队列为空或准入检查未通过时返回 None，
    /// 不阻塞等待，调用方自行轮询。
    async fn dequeue_task(&self, worker_id: &str) -> QueueResult<Option<AnalysisTask>>;

    /// 确认任务结果。任务不存在或已到终态时返回 false（幂等无操作）。
    async fn ack_task(
        &self,
        task_id: &str,
        success: bool,
        result: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> QueueResult<bool>;

    /// 取消任务。已在终态返回 false；处理中的任务立即标记取消并释放
    /// 槽位，Worker 之后的确认将成为无操作。
    async fn cancel_task(&self, task_id: &str) -> QueueResult<bool>;

    async fn get_task(&self, task_id: &str) -> QueueResult<Option<AnalysisTask>>;

    /// 创建批次：每只股票一个任务，全部成功入队或整体失败。
    async fn create_batch(
        &self,
        user_id: &str,
        symbols: &[String],
        parameters: serde_json::Value,
        priority: TaskPriority,
    ) -> QueueResult<AnalysisBatch>;

    async fn get_batch(&self, batch_id: &str) -> QueueResult<Option<AnalysisBatch>>;

    async fn get_batch_status(&self, batch_id: &str) -> QueueResult<BatchStatusSnapshot>;

    /// 取消批次内所有未到终态的成员任务，返回取消数量。
    async fn cancel_batch(&self, batch_id: &str) -> QueueResult<u32>;

    async fn queue_stats(&self) -> QueueStats;

    async fn batch_queue_stats(&self) -> BatchQueueStats;

    async fn user_queue_status(&self, user_id: &str) -> UserQueueStatus;

    // Worker注册表操作（纯观测，见 WorkerRegistry）

    async fn register_worker(&self, worker_id: &str, worker_type: &str) -> QueueResult<WorkerInfo>;

    async fn worker_heartbeat(
        &self,
        worker_id: &str,
        current_task_id: Option<String>,
    ) -> QueueResult<()>;

    async fn unregister_worker(&self, worker_id: &str) -> QueueResult<bool>;

    async fn list_workers(&self) -> QueueResult<Vec<WorkerInfo>>;
}

/// 任务终态结算的种类，驱动批次计数器更新
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettleKind {
    Completed,
    Failed,
    Cancelled,
}

/// 受同一把锁保护的耦合状态
struct SchedulerState {
    tasks: HashMap<String, AnalysisTask>,
    batches: HashMap<String, AnalysisBatch>,
    queue: PriorityQueue,
    admission: AdmissionController,
    leases: LeaseManager,
}

impl SchedulerState {
    /// 更新成员任务结算后的批次计数，必要时把批次推进到终态。
    /// 返回 (批次快照, 是否本次到达终态)。
    fn settle_batch_member(
        &mut self,
        batch_id: &str,
        kind: SettleKind,
    ) -> Option<(AnalysisBatch, bool)> {
        let batch = self.batches.get_mut(batch_id)?;
        match kind {
            SettleKind::Completed => batch.completed_tasks += 1,
            SettleKind::Failed => batch.failed_tasks += 1,
            SettleKind::Cancelled => batch.cancelled_tasks += 1,
        }

        let mut finalized = false;
        if batch.all_settled() && !batch.status.is_terminal() {
            batch.status = if batch.failed_tasks > 0 {
                BatchStatus::Failed
            } else if batch.cancelled_tasks > 0 {
                BatchStatus::Cancelled
            } else {
                BatchStatus::Completed
            };
            batch.completed_at = Some(Utc::now());
            finalized = true;
        }
        Some((batch.clone(), finalized))
    }
}

/// 调度器实现
///
/// 进程内唯一实例，启动时显式构造并注入给调用方，不使用全局单例。
pub struct TaskScheduler {
    state: Mutex<SchedulerState>,
    registry: WorkerRegistry,
    store: Option<Arc<dyn QueueStore>>,
    events: broadcast::Sender<QueueEvent>,
    config: QueueConfig,
}

impl TaskScheduler {
    const EVENT_CHANNEL_CAPACITY: usize = 256;

    pub fn new(config: QueueConfig, store: Option<Arc<dyn QueueStore>>) -> QueueResult<Arc<Self>> {
        config.validate()?;
        let (events, _) = broadcast::channel(Self::EVENT_CHANNEL_CAPACITY);
        let admission = AdmissionController::new(
            config.user_concurrent_limit,
            config.global_concurrent_limit,
        );
        info!(
            "调度器已创建 (用户并发上限: {}, 全局并发上限: {}, 可见性超时: {}s)",
            config.user_concurrent_limit,
            config.global_concurrent_limit,
            config.visibility_timeout_seconds
        );
        Ok(Arc::new(Self {
            state: Mutex::new(SchedulerState {
                tasks: HashMap::new(),
                batches: HashMap::new(),
                queue: PriorityQueue::new(),
                admission,
                leases: LeaseManager::new(),
            }),
            registry: WorkerRegistry::new(),
            store,
            events,
            config,
        }))
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// 订阅生命周期事件流（上层转发给 WebSocket/REST 客户端）
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: QueueEvent) {
        // 没有订阅者时发送失败是正常情况
        let _ = self.events.send(event);
    }

    /// 任务镜像写入外部存储：fire-and-forget，失败只记日志，
    /// 内存状态始终是调度事实来源。
    fn mirror_task(&self, task: AnalysisTask) {
        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            tokio::spawn(async move {
                if let Err(e) = store.save_task(&task).await {
                    warn!("任务 {} 持久化镜像失败（不影响内存状态）: {}", task.id, e);
                }
            });
        }
    }

    fn mirror_batch(&self, batch: AnalysisBatch) {
        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            tokio::spawn(async move {
                if let Err(e) = store.save_batch(&batch).await {
                    warn!("批次 {} 持久化镜像失败（不影响内存状态）: {}", batch.id, e);
                }
            });
        }
    }

    fn settle_kind(success: bool) -> SettleKind {
        if success {
            SettleKind::Completed
        } else {
            SettleKind::Failed
        }
    }

    /// 回收过期租约：清除 Worker 分配、释放准入槽位、递增 retry_count
    /// 并按原优先级重新入队；配置了重试上限且已达上限的任务直接转 Failed。
    /// 由扫描循环周期性调用，对调用方静默。
    pub async fn reclaim_expired_leases(&self) -> Vec<String> {
        let now = Utc::now();
        let mut requeued = Vec::new();
        let mut mirrors: Vec<AnalysisTask> = Vec::new();
        let mut batch_mirrors: Vec<(AnalysisBatch, bool)> = Vec::new();
        let mut registry_clears: Vec<(String, String)> = Vec::new();
        let mut events: Vec<QueueEvent> = Vec::new();

        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            for task_id in state.leases.sweep(now) {
                let Some(task) = state.tasks.get_mut(&task_id) else {
                    continue;
                };
                if !task.is_processing() {
                    // 确认/取消已抢先完成状态转换，租约残留直接丢弃
                    continue;
                }
                let user_id = task.user_id.clone();
                let batch_id = task.batch_id.clone();
                let priority = task.priority;
                if let Some(worker_id) = task.worker_id.take() {
                    registry_clears.push((worker_id, task_id.clone()));
                }

                let exhausted = self
                    .config
                    .max_retries
                    .is_some_and(|max| task.retry_count >= max);

                if exhausted {
                    let max = self.config.max_retries.unwrap_or(0);
                    task.status = TaskStatus::Failed;
                    task.completed_at = Some(now);
                    task.error_message = Some(format!("可见性超时重试次数已达上限 ({max})"));
                    warn!(
                        "任务 {} 租约过期且重试次数已达上限 ({})，标记为失败",
                        task_id, max
                    );
                    let snapshot = task.clone();
                    events.push(QueueEvent::Task(TaskEvent::settled(
                        &task_id,
                        TaskStatus::Failed,
                    )));
                    mirrors.push(snapshot);
                    state.admission.release(&user_id);
                    if let Some(batch_id) = batch_id {
                        if let Some(change) =
                            state.settle_batch_member(&batch_id, SettleKind::Failed)
                        {
                            batch_mirrors.push(change);
                        }
                    }
                } else {
                    task.retry_count += 1;
                    task.status = TaskStatus::Queued;
                    task.requeued_at = Some(now);
                    task.started_at = None;
                    let retry_count = task.retry_count;
                    warn!(
                        "任务 {} 租约过期，重新入队 (第 {} 次重试)",
                        task_id, retry_count
                    );
                    mirrors.push(task.clone());
                    events.push(QueueEvent::Task(TaskEvent::requeued(&task_id, retry_count)));
                    state.admission.release(&user_id);
                    state.queue.push(task_id.clone(), priority);
                    requeued.push(task_id);
                }
            }
        }

        for (worker_id, task_id) in registry_clears {
            self.registry.mark_finished(&worker_id, &task_id, false).await;
        }
        for task in mirrors {
            self.mirror_task(task);
        }
        for (batch, finalized) in batch_mirrors {
            if finalized {
                self.emit(QueueEvent::Batch(BatchEvent::BatchFinalized {
                    id: Uuid::new_v4(),
                    batch_id: batch.id.clone(),
                    status: batch.status,
                    completed_tasks: batch.completed_tasks,
                    failed_tasks: batch.failed_tasks,
                    occurred_at: Utc::now(),
                }));
            }
            self.mirror_batch(batch);
        }
        for event in events {
            self.emit(event);
        }
        requeued
    }

    /// 清理超龄的终态任务与批次，返回删除的任务数。
    /// 外部存储的历史记录同步清理（尽力而为）。
    pub async fn cleanup_terminal_tasks(&self) -> usize {
        let cutoff = Utc::now() - Duration::days(self.config.task_cleanup_age_days as i64);
        let removed = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let stale_tasks: Vec<String> = state
                .tasks
                .values()
                .filter(|t| {
                    t.is_terminal()
                        && t.completed_at.or(t.cancelled_at).is_some_and(|at| at < cutoff)
                })
                .map(|t| t.id.clone())
                .collect();
            for task_id in &stale_tasks {
                state.tasks.remove(task_id);
            }
            let stale_batches: Vec<String> = state
                .batches
                .values()
                .filter(|b| {
                    b.status.is_terminal() && b.completed_at.is_some_and(|at| at < cutoff)
                })
                .map(|b| b.id.clone())
                .collect();
            for batch_id in &stale_batches {
                state.batches.remove(batch_id);
            }
            stale_tasks.len()
        };

        if removed > 0 {
            info!("清理了 {} 个超龄终态任务", removed);
        }
        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            tokio::spawn(async move {
                if let Err(e) = store.delete_terminal_before(cutoff).await {
                    warn!("清理外部存储历史任务失败: {}", e);
                }
            });
        }
        removed
    }

    /// 清理心跳超时的 Worker 注册信息，返回被清理的 Worker id
    pub async fn remove_stale_workers(&self) -> Vec<String> {
        let stale = self
            .registry
            .remove_stale(self.config.worker_heartbeat_timeout_seconds)
            .await;
        for worker_id in &stale {
            self.emit(QueueEvent::Worker(WorkerEvent::WorkerUnregistered {
                id: Uuid::new_v4(),
                worker_id: worker_id.clone(),
                occurred_at: Utc::now(),
            }));
        }
        stale
    }
}

#[async_trait]
impl TaskQueueService for TaskScheduler {
    async fn enqueue_task(
        &self,
        user_id: &str,
        symbol: &str,
        parameters: serde_json::Value,
        priority: TaskPriority,
        batch_id: Option<String>,
    ) -> QueueResult<String> {
        if user_id.trim().is_empty() {
            return Err(QueueError::invalid_input("user_id 不能为空"));
        }
        if symbol.trim().is_empty() {
            return Err(QueueError::invalid_input("symbol 不能为空"));
        }

        let task = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            // 关联已有批次时批次必须存在且未结束
            if let Some(batch_id) = &batch_id {
                let batch = state
                    .batches
                    .get(batch_id)
                    .ok_or_else(|| QueueError::batch_not_found(batch_id.clone()))?;
                if batch.status.is_terminal() {
                    return Err(QueueError::InvalidState(format!(
                        "批次 {batch_id} 已结束，不能追加任务"
                    )));
                }
            }

            // 入队时的准入检查只看在途计数，给生产者即时背压；
            // 出队时还会重新检查并真正占位。
            state.admission.check(user_id)?;

            let task = AnalysisTask::new(
                user_id.to_string(),
                symbol.to_string(),
                parameters,
                priority,
                batch_id.clone(),
            );
            if let Some(batch_id) = &batch_id {
                if let Some(batch) = state.batches.get_mut(batch_id) {
                    batch.task_ids.push(task.id.clone());
                    batch.total_tasks += 1;
                }
            }
            state.queue.push(task.id.clone(), priority);
            state.tasks.insert(task.id.clone(), task.clone());
            task
        };

        info!(
            "任务已入队: {} (用户: {}, 股票: {}, 优先级: {:?})",
            task.id, user_id, symbol, priority
        );
        self.emit(QueueEvent::Task(TaskEvent::enqueued(
            &task.id, user_id, symbol, priority,
        )));
        let task_id = task.id.clone();
        self.mirror_task(task);
        Ok(task_id)
    }

    async fn dequeue_task(&self, worker_id: &str) -> QueueResult<Option<AnalysisTask>> {
        let dispatched = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            loop {
                let Some(task_id) = state.queue.pop() else {
                    return Ok(None);
                };
                let (user_id, priority) = match state.tasks.get(&task_id) {
                    Some(task) if task.is_queued() => (task.user_id.clone(), task.priority),
                    Some(task) => {
                        debug!(
                            "跳过队列中状态为 {} 的残留引用: {}",
                            task.status.as_str(),
                            task_id
                        );
                        continue;
                    }
                    None => {
                        warn!("队列引用了不存在的任务: {}", task_id);
                        continue;
                    }
                };

                // 入队之后在途集合可能已经变化，出队时重新准入；
                // 未通过则原位放回，调用方稍后再来。
                if let Err(denied) = state.admission.admit(&user_id) {
                    debug!("出队准入未通过，任务放回队列: {}", denied);
                    state.queue.push_front(task_id, priority);
                    return Ok(None);
                }

                let now = Utc::now();
                let Some(task) = state.tasks.get_mut(&task_id) else {
                    state.admission.release(&user_id);
                    continue;
                };
                task.status = TaskStatus::Processing;
                task.worker_id = Some(worker_id.to_string());
                task.started_at = Some(now);
                let snapshot = task.clone();

                let deadline =
                    now + Duration::seconds(self.config.visibility_timeout_seconds as i64);
                state.leases.acquire(task_id.clone(), deadline);

                // 批次随首个成员出队进入 processing
                let mut batch_mirror = None;
                if let Some(batch_id) = &snapshot.batch_id {
                    if let Some(batch) = state.batches.get_mut(batch_id) {
                        if batch.status == BatchStatus::Pending {
                            batch.status = BatchStatus::Processing;
                            batch_mirror = Some(batch.clone());
                        }
                    }
                }
                break (snapshot, batch_mirror);
            }
        };

        let (task, batch_mirror) = dispatched;
        info!("任务已出队: {} -> Worker {}", task.id, worker_id);
        self.registry.mark_assigned(worker_id, &task.id).await;
        self.emit(QueueEvent::Task(TaskEvent::dispatched(&task.id, worker_id)));
        self.mirror_task(task.clone());
        if let Some(batch) = batch_mirror {
            self.mirror_batch(batch);
        }
        Ok(Some(task))
    }

    async fn ack_task(
        &self,
        task_id: &str,
        success: bool,
        result: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> QueueResult<bool> {
        let settled = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let Some(task) = state.tasks.get_mut(task_id) else {
                debug!("确认的任务不存在，忽略: {}", task_id);
                return Ok(false);
            };
            if task.is_terminal() {
                // 重复投递或取消/超时竞争中落败的确认，幂等忽略
                debug!(
                    "任务 {} 已处于终态 {}，确认被忽略",
                    task_id,
                    task.status.as_str()
                );
                return Ok(false);
            }

            let was_processing = task.is_processing();
            let user_id = task.user_id.clone();
            let batch_id = task.batch_id.clone();
            let worker_id = task.worker_id.take();
            let now = Utc::now();

            task.status = if success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            task.completed_at = Some(now);
            if success {
                task.result = result;
            } else {
                task.error_message = error_message.or_else(|| Some("分析失败".to_string()));
            }
            let snapshot = task.clone();

            if was_processing {
                state.admission.release(&user_id);
                state.leases.release(task_id);
            } else {
                // 租约过期后重新入队、又收到原 Worker 迟到的结果：
                // 结果有效，直接结算并把任务从就绪队列撤下
                state.queue.remove(task_id);
            }

            let batch_change = batch_id
                .as_deref()
                .and_then(|bid| state.settle_batch_member(bid, Self::settle_kind(success)));
            (snapshot, worker_id, was_processing, batch_change)
        };

        let (task, worker_id, was_processing, batch_change) = settled;
        info!("任务已确认: {} (成功: {})", task_id, success);
        if let (Some(worker_id), true) = (&worker_id, was_processing) {
            self.registry.mark_finished(worker_id, task_id, true).await;
        }
        self.emit(QueueEvent::Task(TaskEvent::settled(task_id, task.status)));
        self.mirror_task(task);
        if let Some((batch, finalized)) = batch_change {
            if finalized {
                info!(
                    "批次 {} 已结束 (状态: {}, 完成: {}, 失败: {})",
                    batch.id,
                    batch.status.as_str(),
                    batch.completed_tasks,
                    batch.failed_tasks
                );
                self.emit(QueueEvent::Batch(BatchEvent::BatchFinalized {
                    id: Uuid::new_v4(),
                    batch_id: batch.id.clone(),
                    status: batch.status,
                    completed_tasks: batch.completed_tasks,
                    failed_tasks: batch.failed_tasks,
                    occurred_at: Utc::now(),
                }));
            }
            self.mirror_batch(batch);
        }
        Ok(true)
    }

    async fn cancel_task(&self, task_id: &str) -> QueueResult<bool> {
        let cancelled = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let Some(task) = state.tasks.get_mut(task_id) else {
                return Err(QueueError::task_not_found(task_id));
            };
            if task.is_terminal() {
                debug!(
                    "任务 {} 已处于终态 {}，取消被忽略",
                    task_id,
                    task.status.as_str()
                );
                return Ok(false);
            }

            let was_processing = task.is_processing();
            let user_id = task.user_id.clone();
            let batch_id = task.batch_id.clone();
            let worker_id = task.worker_id.take();

            task.status = TaskStatus::Cancelled;
            task.cancelled_at = Some(Utc::now());
            let snapshot = task.clone();

            if was_processing {
                // 乐观取消：立即释放槽位与租约，不等 Worker 回应；
                // 之后迟到的确认会因终态检查变成无操作
                state.admission.release(&user_id);
                state.leases.release(task_id);
            } else {
                state.queue.remove(task_id);
            }

            let batch_change = batch_id
                .as_deref()
                .and_then(|bid| state.settle_batch_member(bid, SettleKind::Cancelled));
            (snapshot, worker_id, batch_change)
        };

        let (task, worker_id, batch_change) = cancelled;
        info!("任务已取消: {}", task_id);
        if let Some(worker_id) = &worker_id {
            self.registry.mark_finished(worker_id, task_id, false).await;
        }
        self.emit(QueueEvent::Task(TaskEvent::settled(task_id, task.status)));
        self.mirror_task(task);
        if let Some((batch, _)) = batch_change {
            self.mirror_batch(batch);
        }
        Ok(true)
    }

    async fn get_task(&self, task_id: &str) -> QueueResult<Option<AnalysisTask>> {
        Ok(self.state.lock().await.tasks.get(task_id).cloned())
    }

    async fn create_batch(
        &self,
        user_id: &str,
        symbols: &[String],
        parameters: serde_json::Value,
        priority: TaskPriority,
    ) -> QueueResult<AnalysisBatch> {
        if user_id.trim().is_empty() {
            return Err(QueueError::invalid_input("user_id 不能为空"));
        }
        if symbols.is_empty() {
            return Err(QueueError::invalid_input("股票列表不能为空"));
        }
        if symbols.len() > self.config.max_batch_size {
            return Err(QueueError::BatchTooLarge {
                count: symbols.len(),
                max: self.config.max_batch_size,
            });
        }
        if symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(QueueError::invalid_input("股票代码不能为空"));
        }

        let batch = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            // 与单任务入队一致的背压检查；检查通过后所有成员的创建
            // 都在同一临界区内完成，不存在部分入队的中间状态。
            state.admission.check(user_id)?;

            let mut tasks: Vec<AnalysisTask> = symbols
                .iter()
                .map(|symbol| {
                    AnalysisTask::new(
                        user_id.to_string(),
                        symbol.clone(),
                        parameters.clone(),
                        priority,
                        None,
                    )
                })
                .collect();
            let task_ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
            let batch = AnalysisBatch::new(user_id.to_string(), task_ids);
            for task in &mut tasks {
                task.batch_id = Some(batch.id.clone());
            }
            for task in tasks {
                state.queue.push(task.id.clone(), priority);
                state.tasks.insert(task.id.clone(), task);
            }
            state.batches.insert(batch.id.clone(), batch.clone());
            batch
        };

        info!(
            "批次已创建: {} (用户: {}, 任务数: {})",
            batch.id, user_id, batch.total_tasks
        );
        self.emit(QueueEvent::Batch(BatchEvent::BatchCreated {
            id: Uuid::new_v4(),
            batch_id: batch.id.clone(),
            user_id: user_id.to_string(),
            total_tasks: batch.total_tasks,
            occurred_at: Utc::now(),
        }));
        for (task_id, symbol) in batch.task_ids.iter().zip(symbols.iter()) {
            self.emit(QueueEvent::Task(TaskEvent::enqueued(
                task_id, user_id, symbol, priority,
            )));
        }
        {
            let guard = self.state.lock().await;
            for task_id in &batch.task_ids {
                if let Some(task) = guard.tasks.get(task_id) {
                    self.mirror_task(task.clone());
                }
            }
        }
        self.mirror_batch(batch.clone());
        Ok(batch)
    }

    async fn get_batch(&self, batch_id: &str) -> QueueResult<Option<AnalysisBatch>> {
        Ok(self.state.lock().await.batches.get(batch_id).cloned())
    }

    async fn get_batch_status(&self, batch_id: &str) -> QueueResult<BatchStatusSnapshot> {
        let guard = self.state.lock().await;
        let batch = guard
            .batches
            .get(batch_id)
            .ok_or_else(|| QueueError::batch_not_found(batch_id))?;
        Ok(BatchStatusSnapshot::from(batch))
    }

    async fn cancel_batch(&self, batch_id: &str) -> QueueResult<u32> {
        let (members, batch_mirror) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let batch = state
                .batches
                .get_mut(batch_id)
                .ok_or_else(|| QueueError::batch_not_found(batch_id))?;
            if batch.status.is_terminal() {
                debug!("批次 {} 已结束，取消被忽略", batch_id);
                return Ok(0);
            }
            batch.status = BatchStatus::Cancelled;
            batch.completed_at = Some(Utc::now());
            let member_ids = batch.task_ids.clone();
            let batch_mirror = batch.clone();

            let mut cancelled_members = Vec::new();
            for task_id in member_ids {
                let Some(task) = state.tasks.get_mut(&task_id) else {
                    continue;
                };
                if task.is_terminal() {
                    continue;
                }
                let was_processing = task.is_processing();
                let user_id = task.user_id.clone();
                let worker_id = task.worker_id.take();
                task.status = TaskStatus::Cancelled;
                task.cancelled_at = Some(Utc::now());
                let snapshot = task.clone();

                if was_processing {
                    state.admission.release(&user_id);
                    state.leases.release(&task_id);
                } else {
                    state.queue.remove(&task_id);
                }
                // 批次已整体进入 Cancelled 终态，这里只维护成员计数
                if let Some(batch) = state.batches.get_mut(batch_id) {
                    batch.cancelled_tasks += 1;
                }
                cancelled_members.push((snapshot, worker_id));
            }
            (cancelled_members, batch_mirror)
        };

        let cancelled = members.len() as u32;
        info!("批次已取消: {} (取消成员数: {})", batch_id, cancelled);
        for (task, worker_id) in members {
            if let Some(worker_id) = &worker_id {
                self.registry.mark_finished(worker_id, &task.id, false).await;
            }
            self.emit(QueueEvent::Task(TaskEvent::settled(&task.id, task.status)));
            self.mirror_task(task);
        }
        self.emit(QueueEvent::Batch(BatchEvent::BatchFinalized {
            id: Uuid::new_v4(),
            batch_id: batch_id.to_string(),
            status: BatchStatus::Cancelled,
            completed_tasks: batch_mirror.completed_tasks,
            failed_tasks: batch_mirror.failed_tasks,
            occurred_at: Utc::now(),
        }));
        self.mirror_batch(batch_mirror);
        Ok(cancelled)
    }

    async fn queue_stats(&self) -> QueueStats {
        let guard = self.state.lock().await;
        let mut stats = QueueStats::default();
        for task in guard.tasks.values() {
            match task.status {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats.total = guard.tasks.len() as u64;
        stats
    }

    async fn batch_queue_stats(&self) -> BatchQueueStats {
        let tasks = self.queue_stats().await;
        let guard = self.state.lock().await;
        let mut stats = BatchQueueStats {
            tasks,
            ..Default::default()
        };
        for batch in guard.batches.values() {
            match batch.status {
                BatchStatus::Pending => stats.pending_batches += 1,
                BatchStatus::Processing => stats.active_batches += 1,
                BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled => {
                    stats.completed_batches += 1
                }
            }
        }
        stats
    }

    async fn user_queue_status(&self, user_id: &str) -> UserQueueStatus {
        let guard = self.state.lock().await;
        UserQueueStatus {
            processing: guard.admission.user_in_flight(user_id),
            concurrent_limit: guard.admission.user_limit(),
            available_slots: guard.admission.available_slots(user_id),
        }
    }

    async fn register_worker(&self, worker_id: &str, worker_type: &str) -> QueueResult<WorkerInfo> {
        if worker_id.trim().is_empty() {
            return Err(QueueError::invalid_input("worker_id 不能为空"));
        }
        let info = self.registry.register(worker_id, worker_type).await;
        self.emit(QueueEvent::Worker(WorkerEvent::WorkerRegistered {
            id: Uuid::new_v4(),
            worker_id: worker_id.to_string(),
            occurred_at: Utc::now(),
        }));
        Ok(info)
    }

    async fn worker_heartbeat(
        &self,
        worker_id: &str,
        current_task_id: Option<String>,
    ) -> QueueResult<()> {
        self.registry.heartbeat(worker_id, current_task_id).await
    }

    async fn unregister_worker(&self, worker_id: &str) -> QueueResult<bool> {
        let removed = self.registry.unregister(worker_id).await;
        if removed {
            self.emit(QueueEvent::Worker(WorkerEvent::WorkerUnregistered {
                id: Uuid::new_v4(),
                worker_id: worker_id.to_string(),
                occurred_at: Utc::now(),
            }));
        }
        Ok(removed)
    }

    async fn list_workers(&self) -> QueueResult<Vec<WorkerInfo>> {
        Ok(self.registry.list().await)
    }
}
