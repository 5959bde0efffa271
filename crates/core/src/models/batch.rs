use std::time::Duration;

use crate::config::BatchDefaults;

use super::TaskMessage;

/// 一次批次运行的生效参数
///
/// 消息中的字段优先，缺失时回落到配置中的默认值。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    pub retries_per_channel: u32,
    pub session_refresh_on_failure: bool,
    pub collect_attempts: u32,
    pub channels_per_wave: usize,
    pub pause_between_waves: Duration,
    pub batch_timeout: Option<Duration>,
}

impl BatchSettings {
    /// 波间暂停和批次超时的上限
    pub const MAX_WAIT: Duration = Duration::from_secs(30 * 24 * 3600);

    pub fn resolve(message: &TaskMessage, defaults: &BatchDefaults) -> Self {
        Self {
            retries_per_channel: message
                .retries_per_channel
                .unwrap_or(defaults.retries_per_channel),
            session_refresh_on_failure: message
                .session_refresh_on_failure
                .unwrap_or(defaults.session_refresh_on_failure),
            collect_attempts: message
                .collect_attempts
                .unwrap_or(defaults.collect_attempts)
                .max(1),
            channels_per_wave: message
                .channels_per_wave
                .unwrap_or(defaults.channels_per_wave)
                .max(1),
            pause_between_waves: Duration::from_secs(
                message
                    .pause_between_waves_seconds
                    .unwrap_or(defaults.pause_between_waves_seconds),
            )
            .min(Self::MAX_WAIT),
            batch_timeout: message
                .batch_timeout_seconds
                .or(defaults.batch_timeout_seconds)
                .filter(|secs| *secs > 0)
                .map(|secs| Duration::from_secs(secs).min(Self::MAX_WAIT)),
        }
    }

    /// 每个频道的最大尝试次数
    pub fn attempts_per_channel(&self) -> u32 {
        self.retries_per_channel.saturating_add(1)
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self::resolve(&TaskMessage::default(), &BatchDefaults::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_fields_override_defaults() {
        let message = TaskMessage {
            retries_per_channel: Some(4),
            channels_per_wave: Some(2),
            pause_between_waves_seconds: Some(0),
            session_refresh_on_failure: Some(false),
            ..Default::default()
        };

        let settings = BatchSettings::resolve(&message, &BatchDefaults::default());
        assert_eq!(settings.retries_per_channel, 4);
        assert_eq!(settings.attempts_per_channel(), 5);
        assert_eq!(settings.channels_per_wave, 2);
        assert_eq!(settings.pause_between_waves, Duration::ZERO);
        assert!(!settings.session_refresh_on_failure);
        assert_eq!(settings.collect_attempts, 3);
        assert_eq!(settings.batch_timeout, None);
    }

    #[test]
    fn test_invalid_values_are_clamped() {
        let message = TaskMessage {
            channels_per_wave: Some(0),
            collect_attempts: Some(0),
            batch_timeout_seconds: Some(0),
            ..Default::default()
        };

        let settings = BatchSettings::resolve(&message, &BatchDefaults::default());
        assert_eq!(settings.channels_per_wave, 1);
        assert_eq!(settings.collect_attempts, 1);
        assert_eq!(settings.batch_timeout, None);
    }

    #[test]
    fn test_huge_waits_are_capped() {
        let message = TaskMessage {
            pause_between_waves_seconds: Some(u64::MAX),
            batch_timeout_seconds: Some(u64::MAX),
            ..Default::default()
        };

        let settings = BatchSettings::resolve(&message, &BatchDefaults::default());
        assert_eq!(settings.pause_between_waves, BatchSettings::MAX_WAIT);
        assert_eq!(settings.batch_timeout, Some(BatchSettings::MAX_WAIT));
    }

    #[test]
    fn test_defaults() {
        let settings = BatchSettings::default();
        assert_eq!(settings.channels_per_wave, 5);
        assert_eq!(settings.pause_between_waves, Duration::from_secs(300));
        assert_eq!(settings.retries_per_channel, 1);
        assert!(settings.session_refresh_on_failure);
    }
}
