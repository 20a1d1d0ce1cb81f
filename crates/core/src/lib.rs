pub mod admission;
pub mod config;
pub mod lease;
pub mod priority_queue;
pub mod scheduler;
pub mod sweeper;
pub mod worker_registry;

pub use admission::AdmissionController;
pub use config::QueueConfig;
pub use lease::LeaseManager;
pub use priority_queue::PriorityQueue;
pub use scheduler::{
    BatchQueueStats, QueueStats, TaskQueueService, TaskScheduler, UserQueueStatus,
};
pub use sweeper::{QueueSweeper, SweeperConfig};
pub use worker_registry::WorkerRegistry;

pub use aqueue_errors::{QueueError, QueueResult};
