pub mod app_config;
pub mod sqlite_store;

pub use app_config::{AppConfig, DatabaseConfig, ObservabilityConfig};
pub use sqlite_store::SqliteQueueStore;
