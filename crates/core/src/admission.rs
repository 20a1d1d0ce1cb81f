//! 准入控制
//!
//! 维护全局与按用户的在途（processing）计数，在任务入队与出队时
//! 执行并发上限检查。计数的递增必须与任务状态转换在同一临界区内完成，
//! 调用方（调度器）持有唯一的状态锁来保证这一点。

use std::collections::HashMap;

use aqueue_errors::{QueueError, QueueResult};

#[derive(Debug)]
pub struct AdmissionController {
    user_limit: u32,
    global_limit: u32,
    global_in_flight: u32,
    per_user_in_flight: HashMap<String, u32>,
}

impl AdmissionController {
    pub fn new(user_limit: u32, global_limit: u32) -> Self {
        Self {
            user_limit,
            global_limit,
            global_in_flight: 0,
            per_user_in_flight: HashMap::new(),
        }
    }

    /// 只检查不占位，入队时用于给生产者即时的背压反馈
    pub fn check(&self, user_id: &str) -> QueueResult<()> {
        if self.global_in_flight >= self.global_limit {
            return Err(QueueError::global_limit(self.global_limit));
        }
        if self.user_in_flight(user_id) >= self.user_limit {
            return Err(QueueError::user_limit(user_id, self.user_limit));
        }
        Ok(())
    }

    /// 检查并占用一个并发槽位，出队转 processing 时调用
    pub fn admit(&mut self, user_id: &str) -> QueueResult<()> {
        self.check(user_id)?;
        self.global_in_flight += 1;
        *self
            .per_user_in_flight
            .entry(user_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    /// 释放一个槽位。调用方保证每个任务最多释放一次
    /// （只在任务离开 processing 状态的那次转换中调用）。
    pub fn release(&mut self, user_id: &str) {
        self.global_in_flight = self.global_in_flight.saturating_sub(1);
        if let Some(count) = self.per_user_in_flight.get_mut(user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_user_in_flight.remove(user_id);
            }
        }
    }

    pub fn user_in_flight(&self, user_id: &str) -> u32 {
        self.per_user_in_flight.get(user_id).copied().unwrap_or(0)
    }

    pub fn global_in_flight(&self) -> u32 {
        self.global_in_flight
    }

    pub fn user_limit(&self) -> u32 {
        self.user_limit
    }

    pub fn available_slots(&self, user_id: &str) -> u32 {
        self.user_limit.saturating_sub(self.user_in_flight(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_until_user_limit() {
        let mut admission = AdmissionController::new(2, 10);

        admission.admit("user-1").unwrap();
        admission.admit("user-1").unwrap();
        assert_eq!(admission.user_in_flight("user-1"), 2);

        let denied = admission.admit("user-1").unwrap_err();
        assert!(matches!(denied, QueueError::AdmissionDenied { limit: 2, .. }));

        // 其他用户不受影响
        admission.admit("user-2").unwrap();
        assert_eq!(admission.global_in_flight(), 3);
    }

    #[test]
    fn test_global_limit_wins_over_user_limit() {
        let mut admission = AdmissionController::new(2, 2);
        admission.admit("user-1").unwrap();
        admission.admit("user-2").unwrap();

        let denied = admission.admit("user-3").unwrap_err();
        assert!(matches!(denied, QueueError::AdmissionDenied { limit: 2, .. }));
    }

    #[test]
    fn test_release_frees_slot() {
        let mut admission = AdmissionController::new(1, 10);
        admission.admit("user-1").unwrap();
        assert!(admission.check("user-1").is_err());

        admission.release("user-1");
        assert_eq!(admission.user_in_flight("user-1"), 0);
        assert!(admission.check("user-1").is_ok());
        assert_eq!(admission.global_in_flight(), 0);
    }

    #[test]
    fn test_release_is_saturating() {
        let mut admission = AdmissionController::new(1, 10);
        admission.release("user-1");
        admission.release("user-1");
        assert_eq!(admission.global_in_flight(), 0);
        assert_eq!(admission.user_in_flight("user-1"), 0);
    }

    #[test]
    fn test_available_slots() {
        let mut admission = AdmissionController::new(3, 10);
        assert_eq!(admission.available_slots("user-1"), 3);
        admission.admit("user-1").unwrap();
        assert_eq!(admission.available_slots("user-1"), 2);
    }
}
