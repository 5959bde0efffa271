use serde::{Deserialize, Serialize};

/// 频道列表接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsApiConfig {
    pub url: Option<String>,
    /// 以查询串形式拼接在URL后面
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ChannelsApiConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            timeout_seconds: 30,
        }
    }
}

impl ChannelsApiConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_http_url(self.url.as_deref(), "频道列表接口")?;
        if self.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("频道列表接口超时时间必须大于0"));
        }
        Ok(())
    }
}

/// 批次完成回调配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseCallbackConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ReleaseCallbackConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            timeout_seconds: 15,
        }
    }
}

impl ReleaseCallbackConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_http_url(self.url.as_deref(), "批次回调")?;
        if self.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("批次回调超时时间必须大于0"));
        }
        Ok(())
    }
}

fn validate_http_url(url: Option<&str>, name: &str) -> anyhow::Result<()> {
    match url {
        Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => Err(
            anyhow::anyhow!("{name} URL必须以http://或https://开头: {url}"),
        ),
        _ => Ok(()),
    }
}
