//! 配置管理
//!
//! 所有配置段都带 `#[serde(default)]`，因此配置文件只需要写出与默认值不同的部分。
//! 加载顺序为：默认值 → TOML 文件 → `HARVESTER__` 前缀的环境变量。
//!
//! ```rust,no_run
//! use harvester_core::config::AppConfig;
//!
//! let config = AppConfig::load(Some("config/harvester.toml"))?;
//! println!("消费队列: {}", config.message_queue.queue);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod models;

pub use models::{
    AppConfig, BatchDefaults, ChannelsApiConfig, DatabaseConfig, DispatcherConfig,
    MessageQueueConfig, ObservabilityConfig, ParserConfig, ProgressConfig,
    ReleaseCallbackConfig, WorkerConfig,
};

#[cfg(test)]
mod tests;
