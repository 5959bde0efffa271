use serde::{Deserialize, Serialize};

/// 批次任务的默认参数，消息中未携带的字段使用这里的值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchDefaults {
    pub channels_per_wave: usize,
    pub pause_between_waves_seconds: u64,
    pub retries_per_channel: u32,
    pub collect_attempts: u32,
    pub session_refresh_on_failure: bool,
    /// 整个批次的最长运行时间，None 表示不限制
    pub batch_timeout_seconds: Option<u64>,
    /// 单频道任务（type = channel）的最大尝试次数
    pub channel_max_retries: u32,
}

impl Default for BatchDefaults {
    fn default() -> Self {
        Self {
            channels_per_wave: 5,
            pause_between_waves_seconds: 300,
            retries_per_channel: 1,
            collect_attempts: 3,
            session_refresh_on_failure: true,
            batch_timeout_seconds: None,
            channel_max_retries: 3,
        }
    }
}

impl BatchDefaults {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.channels_per_wave == 0 {
            return Err(anyhow::anyhow!("每波频道数必须大于0"));
        }

        if self.collect_attempts == 0 {
            return Err(anyhow::anyhow!("采集尝试次数必须大于0"));
        }

        if self.channel_max_retries == 0 {
            return Err(anyhow::anyhow!("单频道最大尝试次数必须大于0"));
        }

        if self.batch_timeout_seconds == Some(0) {
            return Err(anyhow::anyhow!("批次超时时间必须大于0"));
        }

        Ok(())
    }
}

/// 批次进度文件存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub base_dir: String,
    /// 超过该时长未更新的进度文件在 Worker 启动时删除，0 表示不清理
    pub stale_after_hours: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            base_dir: "/app/storage/instagram_batch_state".to_string(),
            stale_after_hours: 72,
        }
    }
}

impl ProgressConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("进度存储目录不能为空"));
        }
        Ok(())
    }
}

/// 外部采集命令配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            command: "harvest-channel".to_string(),
            args: Vec::new(),
            working_dir: None,
            timeout_seconds: 1800,
        }
    }
}

impl ParserConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.command.trim().is_empty() {
            return Err(anyhow::anyhow!("采集命令不能为空"));
        }
        if self.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("采集命令超时时间必须大于0"));
        }
        Ok(())
    }
}
