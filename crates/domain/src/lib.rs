pub mod entities;
pub mod events;
pub mod stores;

pub use entities::*;
pub use events::*;
pub use stores::*;

pub use aqueue_errors::{AdmissionScope, QueueError, QueueResult};
