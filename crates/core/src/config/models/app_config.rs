use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    batch::{BatchDefaults, ParserConfig, ProgressConfig},
    database::DatabaseConfig,
    dispatcher_worker::{DispatcherConfig, ObservabilityConfig, WorkerConfig},
    endpoints::{ChannelsApiConfig, ReleaseCallbackConfig},
    message_queue::MessageQueueConfig,
};

/// 默认的配置文件搜索路径
const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/harvester.toml",
    "harvester.toml",
    "/etc/harvester/config.toml",
];

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub message_queue: MessageQueueConfig,
    pub channels_api: ChannelsApiConfig,
    pub release_callback: ReleaseCallbackConfig,
    pub progress: ProgressConfig,
    pub batch: BatchDefaults,
    pub parser: ParserConfig,
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration (every section is `#[serde(default)]`)
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: HARVESTER, separator: `__`)
    ///
    /// 例如 `HARVESTER__MESSAGE_QUEUE__URL=amqp://...`
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        // 1. Load config file if provided
        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        // 2. Environment variable overrides - highest priority
        builder = builder.add_source(
            Environment::with_prefix("HARVESTER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.message_queue
            .validate()
            .context("消息队列配置验证失败")?;
        self.channels_api
            .validate()
            .context("频道列表接口配置验证失败")?;
        self.release_callback
            .validate()
            .context("批次回调配置验证失败")?;
        self.progress.validate().context("进度存储配置验证失败")?;
        self.batch.validate().context("批次默认参数验证失败")?;
        self.parser.validate().context("采集命令配置验证失败")?;
        self.database.validate().context("数据库配置验证失败")?;
        self.dispatcher
            .validate()
            .context("Dispatcher配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}
