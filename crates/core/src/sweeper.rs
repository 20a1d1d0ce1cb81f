//! 队列扫描循环
//!
//! 周期性驱动调度器的三项维护工作：回收过期租约、清理心跳超时的
//! Worker 注册信息、清理超龄的终态任务。扫描是调度器至少一次投递
//! 语义的保障，进程内必须恰好运行一个。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::scheduler::TaskScheduler;

/// 扫描循环配置
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// 扫描间隔（秒）
    pub sweep_interval_seconds: u64,
    /// 每多少轮扫描执行一次终态任务清理
    pub cleanup_every_n_sweeps: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 5,
            cleanup_every_n_sweeps: 720, // 默认每小时清理一次
        }
    }
}

/// 队列扫描服务
pub struct QueueSweeper {
    scheduler: Arc<TaskScheduler>,
    config: SweeperConfig,
    running: Arc<RwLock<bool>>,
}

impl QueueSweeper {
    pub fn new(scheduler: Arc<TaskScheduler>, config: Option<SweeperConfig>) -> Self {
        let config = config.unwrap_or_else(|| SweeperConfig {
            sweep_interval_seconds: scheduler.config().sweep_interval_seconds,
            ..Default::default()
        });
        Self {
            scheduler,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 启动扫描循环，阻塞直到 stop 被调用
    pub async fn start(&self) {
        info!(
            "启动队列扫描循环 (间隔: {}s)",
            self.config.sweep_interval_seconds
        );
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let interval = Duration::from_secs(self.config.sweep_interval_seconds);
        let mut tick: u64 = 0;

        loop {
            if !*self.running.read().await {
                info!("收到停止信号，退出队列扫描循环");
                break;
            }

            tick = tick.wrapping_add(1);
            self.run_once().await;

            if self.config.cleanup_every_n_sweeps > 0
                && tick % self.config.cleanup_every_n_sweeps == 0
            {
                self.scheduler.cleanup_terminal_tasks().await;
            }

            tokio::time::sleep(interval).await;
        }
    }

    pub async fn stop(&self) {
        info!("停止队列扫描循环");
        let mut running = self.running.write().await;
        *running = false;
    }

    /// 执行一轮扫描（测试中可直接调用，不经过循环）
    pub async fn run_once(&self) {
        debug!("开始一轮队列扫描");

        let requeued = self.scheduler.reclaim_expired_leases().await;
        if !requeued.is_empty() {
            info!("本轮回收了 {} 个过期租约", requeued.len());
        }

        let stale_workers = self.scheduler.remove_stale_workers().await;
        if !stale_workers.is_empty() {
            info!("本轮清理了 {} 个心跳超时的 Worker", stale_workers.len());
        }
    }
}
