use async_trait::async_trait;
use harvester_core::{
    config::ChannelsApiConfig, ChannelLister, ChannelTask, HarvesterError, Result,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::build_client;

/// 通过HTTP接口获取待采集的频道列表
pub struct HttpChannelLister {
    url: String,
    http_client: reqwest::Client,
}

impl HttpChannelLister {
    pub fn new(url: &str, token: Option<&str>, timeout_seconds: u64) -> Result<Self> {
        Ok(Self {
            url: with_token(url, token),
            http_client: build_client(timeout_seconds)?,
        })
    }

    /// 未配置接口地址时返回 None
    pub fn from_config(config: &ChannelsApiConfig) -> Result<Option<Self>> {
        let Some(ref url) = config.url else {
            debug!("未配置频道列表接口");
            return Ok(None);
        };
        Self::new(url, config.token.as_deref(), config.timeout_seconds).map(Some)
    }
}

#[async_trait]
impl ChannelLister for HttpChannelLister {
    async fn fetch_channels(&self) -> Result<Vec<ChannelTask>> {
        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| HarvesterError::Http(format!("请求频道列表失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarvesterError::ChannelListing(format!(
                "HTTP {status} - {body}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| HarvesterError::ChannelListing(format!("响应体不是合法JSON: {e}")))?;

        let channels = parse_channel_listing(&payload)?;
        info!(count = channels.len(), "从接口获取到频道列表");
        Ok(channels)
    }
}

/// token 原样作为查询串拼接在URL后
fn with_token(url: &str, token: Option<&str>) -> String {
    match token.filter(|token| !token.is_empty()) {
        Some(token) => {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{url}{separator}{token}")
        }
        None => url.to_string(),
    }
}

/// 解析 `{"channels": [...]}` 或直接的数组，缺少 `id` / `link` 的条目被跳过
fn parse_channel_listing(payload: &Value) -> Result<Vec<ChannelTask>> {
    let entries = match payload {
        Value::Array(entries) => entries,
        Value::Object(map) => match map.get("channels") {
            Some(Value::Array(entries)) => entries,
            Some(Value::Null) | None => return Ok(Vec::new()),
            Some(_) => {
                return Err(HarvesterError::ChannelListing(
                    "channels 字段不是数组".to_string(),
                ))
            }
        },
        _ => {
            return Err(HarvesterError::ChannelListing(
                "响应体格式不正确".to_string(),
            ))
        }
    };

    let mut channels = Vec::with_capacity(entries.len());
    for entry in entries {
        let id = entry.get("id").and_then(as_i64).filter(|id| *id != 0);
        let link = entry
            .get("link")
            .and_then(Value::as_str)
            .filter(|link| !link.is_empty());

        let (Some(id), Some(link)) = (id, link) else {
            warn!(entry = %entry, "频道条目缺少id或link，已跳过");
            continue;
        };

        channels.push(ChannelTask {
            channel_id: id,
            url: link.to_string(),
            user_id: entry.get("user_id").and_then(as_i64),
            parse_started_at: entry
                .get("parse_started_at")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    Ok(channels)
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_with_token() {
        assert_eq!(with_token("http://a/c", None), "http://a/c");
        assert_eq!(with_token("http://a/c", Some("token=x")), "http://a/c?token=x");
        assert_eq!(
            with_token("http://a/c?type=inst", Some("token=x")),
            "http://a/c?type=inst&token=x"
        );
        assert_eq!(with_token("http://a/c", Some("")), "http://a/c");
    }

    #[test]
    fn test_parse_listing_skips_incomplete_entries() {
        let payload = json!({
            "channels": [
                {"id": 1, "link": "https://instagram.com/a", "user_id": 3},
                {"id": 2},
                {"link": "https://instagram.com/c"},
                {"id": "4", "link": "https://instagram.com/d", "parse_started_at": "2025-01-01T00:00:00"}
            ]
        });

        let channels = parse_channel_listing(&payload).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].channel_id, 1);
        assert_eq!(channels[0].user_id, Some(3));
        assert_eq!(channels[1].channel_id, 4);
        assert_eq!(
            channels[1].parse_started_at.as_deref(),
            Some("2025-01-01T00:00:00")
        );
    }

    #[test]
    fn test_parse_listing_accepts_bare_array_and_rejects_garbage() {
        let channels = parse_channel_listing(&json!([{"id": 9, "link": "x"}])).unwrap();
        assert_eq!(channels[0].channel_id, 9);

        assert!(parse_channel_listing(&json!({"channels": null})).unwrap().is_empty());
        assert!(parse_channel_listing(&json!("nope")).is_err());
        assert!(parse_channel_listing(&json!({"channels": 5})).is_err());
    }

    #[tokio::test]
    async fn test_fetch_channels_over_http() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels"))
            .and(query_param("token", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "channels": [{"id": 10, "link": "https://instagram.com/x"}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = format!("{}/channels", mock_server.uri());
        let lister = HttpChannelLister::new(&url, Some("token=secret"), 5).unwrap();
        let channels = lister.fetch_channels().await.unwrap();

        assert_eq!(channels, vec![ChannelTask::new(10, "https://instagram.com/x")]);
    }

    #[tokio::test]
    async fn test_fetch_channels_non_2xx_is_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "unauthorized"})),
            )
            .mount(&mock_server)
            .await;

        let lister = HttpChannelLister::new(&mock_server.uri(), None, 5).unwrap();
        assert!(matches!(
            lister.fetch_channels().await,
            Err(HarvesterError::ChannelListing(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_channels_malformed_body_is_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&mock_server)
            .await;

        let lister = HttpChannelLister::new(&mock_server.uri(), None, 5).unwrap();
        assert!(matches!(
            lister.fetch_channels().await,
            Err(HarvesterError::ChannelListing(_))
        ));
    }
}
