//! Test data builders
//!
//! Builder patterns for creating test data with sensible defaults.

use chrono::{DateTime, Duration, TimeZone, Utc};
use harvester_core::{Account, ChannelRecord, ChannelTask, Proxy, SourceType, TaskMessage};

/// Builder for creating test ChannelRecord entities
pub struct ChannelRecordBuilder {
    channel: ChannelRecord,
}

impl ChannelRecordBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            channel: ChannelRecord {
                id,
                link: format!("https://www.tiktok.com/@channel{id}"),
                source_type: SourceType::Tiktok,
                user_id: Some(1),
                created_at: base_time() + Duration::minutes(id),
            },
        }
    }

    pub fn with_link(mut self, link: &str) -> Self {
        self.channel.link = link.to_string();
        self
    }

    pub fn with_source(mut self, source_type: SourceType) -> Self {
        self.channel.source_type = source_type;
        self
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.channel.user_id = Some(user_id);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.channel.created_at = created_at;
        self
    }

    pub fn build(self) -> ChannelRecord {
        self.channel
    }
}

/// Builder for creating batch task messages
pub struct BatchMessageBuilder {
    message: TaskMessage,
}

impl BatchMessageBuilder {
    pub fn new(batch_id: &str) -> Self {
        Self {
            message: TaskMessage::batch(batch_id, Vec::new(), Vec::new(), Vec::new()),
        }
    }

    /// Inline channels with the given ids
    pub fn with_channel_ids(mut self, ids: &[i64]) -> Self {
        self.message.channels = Some(channel_tasks(ids));
        self
    }

    /// Leave the channel list empty so the runner fetches it
    pub fn without_channels(mut self) -> Self {
        self.message.channels = None;
        self
    }

    pub fn with_accounts(mut self, accounts: &[&str]) -> Self {
        self.message.accounts = accounts.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_proxies(mut self, proxies: &[&str]) -> Self {
        self.message.proxy_list = proxies.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn channels_per_wave(mut self, size: usize) -> Self {
        self.message.channels_per_wave = Some(size);
        self
    }

    pub fn retries_per_channel(mut self, retries: u32) -> Self {
        self.message.retries_per_channel = Some(retries);
        self
    }

    pub fn pause_between_waves(mut self, seconds: u64) -> Self {
        self.message.pause_between_waves_seconds = Some(seconds);
        self
    }

    pub fn session_refresh(mut self, enabled: bool) -> Self {
        self.message.session_refresh_on_failure = Some(enabled);
        self
    }

    pub fn batch_timeout(mut self, seconds: u64) -> Self {
        self.message.batch_timeout_seconds = Some(seconds);
        self
    }

    pub fn build(self) -> TaskMessage {
        self.message
    }
}

pub fn channel_tasks(ids: &[i64]) -> Vec<ChannelTask> {
    ids.iter()
        .map(|id| ChannelTask::new(*id, format!("https://www.instagram.com/channel{id}/")))
        .collect()
}

pub fn account(id: i64, account_str: &str, is_active: bool) -> Account {
    Account {
        id,
        account_str: account_str.to_string(),
        is_active,
    }
}

pub fn proxy(id: i64, proxy_str: &str, for_likee: bool) -> Proxy {
    Proxy {
        id,
        proxy_str: proxy_str.to_string(),
        is_active: true,
        for_likee,
    }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}
