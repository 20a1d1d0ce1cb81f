//! 租约管理
//!
//! 为每个处理中的任务记录一个过期时刻（可见性超时）。Worker 崩溃或
//! 挂起未确认时，租约到期后任务被扫描循环回收重新入队，从而提供
//! 至少一次投递语义。本结构不带锁，由调度器的状态锁保护。

use std::collections::HashMap;

use chrono::{DateTime, Utc};

#[derive(Debug, Default)]
pub struct LeaseManager {
    deadlines: HashMap<String, DateTime<Utc>>,
}

impl LeaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记租约过期时刻，重复登记覆盖旧值
    pub fn acquire(&mut self, task_id: String, deadline: DateTime<Utc>) {
        self.deadlines.insert(task_id, deadline);
    }

    /// 清除租约，返回之前是否存在
    pub fn release(&mut self, task_id: &str) -> bool {
        self.deadlines.remove(task_id).is_some()
    }

    /// 返回并清除所有已过期的任务 id
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(task_id, _)| task_id.clone())
            .collect();
        for task_id in &expired {
            self.deadlines.remove(task_id);
        }
        expired
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.deadlines.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
