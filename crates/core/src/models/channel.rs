use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::ChannelTask;
use crate::HarvesterError;

/// 频道来源平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Youtube,
    Tiktok,
    Instagram,
    Likee,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Youtube => "youtube",
            SourceType::Tiktok => "tiktok",
            SourceType::Instagram => "instagram",
            SourceType::Likee => "likee",
        }
    }

    /// 该类型频道的采集队列名
    pub fn queue_name(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.as_str())
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = HarvesterError;

    /// 数据库里存的是枚举名（如 `TIKTOK`），这里不区分大小写
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube" => Ok(SourceType::Youtube),
            "tiktok" => Ok(SourceType::Tiktok),
            "instagram" => Ok(SourceType::Instagram),
            "likee" => Ok(SourceType::Likee),
            other => Err(HarvesterError::Configuration(format!(
                "未知的频道类型: {other}"
            ))),
        }
    }
}

/// 持久化的频道记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: i64,
    pub link: String,
    pub source_type: SourceType,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ChannelRecord {
    /// 转换为采集任务中的频道条目
    pub fn to_task(&self) -> ChannelTask {
        ChannelTask {
            channel_id: self.id,
            url: self.link.clone(),
            user_id: self.user_id,
            parse_started_at: None,
        }
    }
}

/// 采集账号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub account_str: String,
    pub is_active: bool,
}

/// 代理
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub id: i64,
    pub proxy_str: String,
    pub is_active: bool,
    /// 仅供 likee 频道使用的代理
    pub for_likee: bool,
}
