use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 启动后等待多久才注册周期任务，避免每次重启都集中触发采集
    pub startup_delay_seconds: u64,
    pub interval_hours: u64,
    /// 相邻频道首次触发之间的间隔
    pub stagger_minutes: u64,
    /// 这一类型的频道走批次任务而不是单频道周期任务，None 表示关闭
    pub batch_source: Option<String>,
    /// 批次投递后最长保持批次锁的时间，期间其他频道的周期任务被推迟
    pub batch_lock_timeout_minutes: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_delay_seconds: 300,
            interval_hours: 24,
            stagger_minutes: 5,
            batch_source: Some("instagram".to_string()),
            batch_lock_timeout_minutes: 120,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_hours == 0 {
            return Err(anyhow::anyhow!("周期任务间隔必须大于0"));
        }

        if self.batch_lock_timeout_minutes == 0 {
            return Err(anyhow::anyhow!("批次锁超时时间必须大于0"));
        }

        if let Some(source) = &self.batch_source {
            if source.trim().is_empty() {
                return Err(anyhow::anyhow!("批次频道类型不能为空字符串"));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_id: String,
    /// 同一进程内并行运行的消费者数量
    pub consumers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_id: "worker-001".to_string(),
            consumers: 1,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            return Err(anyhow::anyhow!("Worker ID不能为空"));
        }

        if self.consumers == 0 {
            return Err(anyhow::anyhow!("消费者数量必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_bind_address: "0.0.0.0:9464".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志级别: {}，支持的级别: {:?}",
                self.log_level,
                valid_levels
            ));
        }

        if self.metrics_enabled && self.metrics_bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "无效的指标监听地址: {}",
                self.metrics_bind_address
            ));
        }

        Ok(())
    }
}
