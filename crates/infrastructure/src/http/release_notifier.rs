use async_trait::async_trait;
use harvester_core::{config::ReleaseCallbackConfig, HarvesterError, ReleaseNotifier, Result};
use serde_json::json;
use tracing::{debug, info};

use super::build_client;

/// 批次完成后回调释放接口，请求体为 `{batch_id, token}`
pub struct HttpReleaseNotifier {
    url: Option<String>,
    token: Option<String>,
    http_client: reqwest::Client,
}

impl HttpReleaseNotifier {
    pub fn new(config: &ReleaseCallbackConfig) -> Result<Self> {
        Ok(Self {
            url: config.url.clone(),
            token: config.token.clone(),
            http_client: build_client(config.timeout_seconds)?,
        })
    }
}

#[async_trait]
impl ReleaseNotifier for HttpReleaseNotifier {
    async fn notify_release(&self, batch_id: &str) -> Result<()> {
        let Some(ref url) = self.url else {
            debug!(batch_id, "未配置批次回调地址，跳过通知");
            return Ok(());
        };

        let body = json!({
            "batch_id": batch_id,
            "token": self.token,
        });

        let response = self
            .http_client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| HarvesterError::Http(format!("批次回调请求失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarvesterError::Http(format!(
                "批次回调失败: HTTP {status} - {body}"
            )));
        }

        info!(batch_id, "批次回调成功");
        Ok(())
    }
}
