use harvester_core::config::MessageQueueConfig;
use std::time::Duration;

/// 重连策略：带上限的指数退避加随机抖动
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
    /// None 表示无限重连
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &MessageQueueConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            max_attempts: (config.reconnect_max_attempts > 0)
                .then_some(config.reconnect_max_attempts),
            ..Default::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// 第 `attempt` 次连续失败（从1开始）之后是否还应该继续重连
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// 第 `attempt` 次连续失败（从1开始）之后的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64().max(base);
        let exponent = attempt.saturating_sub(1).min(32) as i32;

        // 计算指数退避间隔
        let exponential = base * self.backoff_multiplier.powi(exponent);
        let capped = exponential.min(max);

        // 添加随机抖动以避免所有消费者同时重连
        let jitter = if self.jitter_factor > 0.0 {
            capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_secs_f64((capped + jitter).clamp(base, max))
    }
}
