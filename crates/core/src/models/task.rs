use serde::{Deserialize, Deserializer, Serialize};

use crate::{HarvesterError, Result};

/// 队列消息中的任务类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// 单个频道采集
    Channel,
    /// 一批频道分波采集
    #[serde(alias = "batch")]
    InstagramBatch,
    /// 无法识别的类型，消息会被确认后丢弃
    #[default]
    #[serde(other)]
    Unknown,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Channel => "channel",
            TaskType::InstagramBatch => "instagram_batch",
            TaskType::Unknown => "unknown",
        }
    }
}

/// 批次中的单个频道任务，以 `channel_id` 为唯一标识
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTask {
    pub channel_id: i64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_started_at: Option<String>,
}

impl ChannelTask {
    pub fn new(channel_id: i64, url: impl Into<String>) -> Self {
        Self {
            channel_id,
            url: url.into(),
            user_id: None,
            parse_started_at: None,
        }
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// 队列中的任务消息
///
/// 除 `type` 以外的字段都是可选的，未知字段会被忽略。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    #[serde(rename = "type", default)]
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub accounts: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub proxy_list: Vec<String>,
    #[serde(default)]
    pub parse_started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<ChannelTask>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries_per_channel: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_refresh_on_failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels_per_wave: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_between_waves_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_timeout_seconds: Option<u64>,
}

impl TaskMessage {
    /// 构造单频道任务
    pub fn channel(task: &ChannelTask, accounts: Vec<String>, proxy_list: Vec<String>) -> Self {
        Self {
            task_type: TaskType::Channel,
            url: Some(task.url.clone()),
            user_id: task.user_id,
            channel_id: Some(task.channel_id),
            accounts,
            proxy_list,
            parse_started_at: task.parse_started_at.clone(),
            ..Default::default()
        }
    }

    /// 构造批次任务
    pub fn batch(
        batch_id: impl Into<String>,
        channels: Vec<ChannelTask>,
        accounts: Vec<String>,
        proxy_list: Vec<String>,
    ) -> Self {
        Self {
            task_type: TaskType::InstagramBatch,
            batch_id: Some(batch_id.into()),
            channels: Some(channels),
            accounts,
            proxy_list,
            ..Default::default()
        }
    }

    pub fn with_parse_started_at(mut self, parse_started_at: impl Into<String>) -> Self {
        self.parse_started_at = Some(parse_started_at.into());
        self
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| HarvesterError::MalformedTask(format!("解析任务消息失败: {e}")))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| HarvesterError::Serialization(format!("序列化任务消息失败: {e}")))
    }

    /// 单频道任务的目标频道，缺少 `channel_id` 或 `url` 时视为无效消息
    pub fn channel_target(&self) -> Result<ChannelTask> {
        let channel_id = self
            .channel_id
            .ok_or_else(|| HarvesterError::MalformedTask("缺少channel_id".to_string()))?;
        let url = self
            .url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| HarvesterError::MalformedTask("缺少url".to_string()))?;

        Ok(ChannelTask {
            channel_id,
            url: url.to_string(),
            user_id: self.user_id,
            parse_started_at: self.parse_started_at.clone(),
        })
    }

    /// 消息内联的频道列表，空列表与缺失同样返回 None
    pub fn inline_channels(&self) -> Option<Vec<ChannelTask>> {
        self.channels
            .as_ref()
            .filter(|channels| !channels.is_empty())
            .map(|channels| {
                channels
                    .iter()
                    .cloned()
                    .map(|mut task| {
                        if task.parse_started_at.is_none() {
                            task.parse_started_at = self.parse_started_at.clone();
                        }
                        task
                    })
                    .collect()
            })
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
