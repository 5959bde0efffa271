pub mod app_config;
pub mod batch;
pub mod database;
pub mod dispatcher_worker;
pub mod endpoints;
pub mod message_queue;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use batch::{BatchDefaults, ParserConfig, ProgressConfig};
pub use database::DatabaseConfig;
pub use dispatcher_worker::{DispatcherConfig, ObservabilityConfig, WorkerConfig};
pub use endpoints::{ChannelsApiConfig, ReleaseCallbackConfig};
pub use message_queue::MessageQueueConfig;
