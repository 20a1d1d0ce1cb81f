//! 就绪任务优先级队列
//!
//! 按优先级分桶的 FIFO 队列：高优先级档位整体先于低档位出队，
//! 同档位内按入队顺序出队，避免饥饿。支持按 id 移除以实现
//! 未出队任务的取消。本结构不带锁，由调度器的状态锁保护。

use std::collections::VecDeque;

use aqueue_domain::TaskPriority;

#[derive(Debug, Default)]
pub struct PriorityQueue {
    bands: [VecDeque<String>; TaskPriority::BANDS],
    len: usize,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加到对应档位尾部
    pub fn push(&mut self, task_id: String, priority: TaskPriority) {
        self.bands[priority.band()].push_back(task_id);
        self.len += 1;
    }

    /// 放回档位头部，用于出队后准入失败的回退，保持原有顺序
    pub fn push_front(&mut self, task_id: String, priority: TaskPriority) {
        self.bands[priority.band()].push_front(task_id);
        self.len += 1;
    }

    /// 弹出当前最高优先级的任务 id
    pub fn pop(&mut self) -> Option<String> {
        for band in self.bands.iter_mut().rev() {
            if let Some(task_id) = band.pop_front() {
                self.len -= 1;
                return Some(task_id);
            }
        }
        None
    }

    /// 按 id 移除，返回是否存在
    pub fn remove(&mut self, task_id: &str) -> bool {
        for band in self.bands.iter_mut() {
            if let Some(pos) = band.iter().position(|id| id == task_id) {
                band.remove(pos);
                self.len -= 1;
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_priority_ordering() {
        let mut queue = PriorityQueue::new();
        queue.push("low-1".to_string(), TaskPriority::Low);
        queue.push("urgent-1".to_string(), TaskPriority::Urgent);
        queue.push("normal-1".to_string(), TaskPriority::Normal);
        queue.push("low-2".to_string(), TaskPriority::Low);

        assert_eq!(queue.pop().as_deref(), Some("urgent-1"));
        assert_eq!(queue.pop().as_deref(), Some("normal-1"));
        assert_eq!(queue.pop().as_deref(), Some("low-1"));
        assert_eq!(queue.pop().as_deref(), Some("low-2"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_fifo_within_band() {
        let mut queue = PriorityQueue::new();
        for i in 0..5 {
            queue.push(format!("task-{i}"), TaskPriority::High);
        }
        for i in 0..5 {
            assert_eq!(queue.pop(), Some(format!("task-{i}")));
        }
    }

    #[test]
    fn test_push_front_preserves_position() {
        let mut queue = PriorityQueue::new();
        queue.push("a".to_string(), TaskPriority::Normal);
        queue.push("b".to_string(), TaskPriority::Normal);

        let popped = queue.pop().unwrap();
        assert_eq!(popped, "a");
        queue.push_front(popped, TaskPriority::Normal);

        assert_eq!(queue.pop().as_deref(), Some("a"));
        assert_eq!(queue.pop().as_deref(), Some("b"));
    }

    #[test]
    fn test_remove_by_id() {
        let mut queue = PriorityQueue::new();
        queue.push("a".to_string(), TaskPriority::Low);
        queue.push("b".to_string(), TaskPriority::Urgent);
        assert_eq!(queue.len(), 2);

        assert!(queue.remove("a"));
        assert!(!queue.remove("a"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().as_deref(), Some("b"));
        assert!(queue.is_empty());
    }
}
