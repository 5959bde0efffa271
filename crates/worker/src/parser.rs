use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use harvester_core::{
    config::ParserConfig, ChannelParser, HarvesterError, ParseRequest, Result,
};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 通过外部命令采集频道
///
/// 每个频道启动一次配置的采集命令，退出码为0视为成功。频道信息通过命令行参数传入，
/// 账号和代理列表以 JSON 数组放在 `HARVESTER_ACCOUNTS` / `HARVESTER_PROXIES`
/// 环境变量中。
pub struct CommandParser {
    config: ParserConfig,
    accounts: RwLock<Vec<String>>,
    proxies: RwLock<Vec<String>>,
}

impl CommandParser {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            accounts: RwLock::new(Vec::new()),
            proxies: RwLock::new(Vec::new()),
        }
    }

    async fn build_command(&self, request: &ParseRequest) -> Result<Command> {
        let channel = &request.channel;

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        cmd.arg("--url").arg(&channel.url);
        cmd.arg("--channel-id").arg(channel.channel_id.to_string());
        if let Some(user_id) = channel.user_id {
            cmd.arg("--user-id").arg(user_id.to_string());
        }
        cmd.arg("--collect-attempts")
            .arg(request.collect_attempts.max(1).to_string());
        if let Some(ref started_at) = channel.parse_started_at {
            cmd.arg("--parse-started-at").arg(started_at);
        }
        if request.refresh_session {
            cmd.arg("--refresh-session");
        }

        // 请求里没有带账号/代理时使用批次开始前准备好的
        let accounts = if request.accounts.is_empty() {
            self.accounts.read().await.clone()
        } else {
            request.accounts.clone()
        };
        let proxies = if request.proxy_list.is_empty() {
            self.proxies.read().await.clone()
        } else {
            request.proxy_list.clone()
        };
        cmd.env("HARVESTER_ACCOUNTS", to_json(&accounts)?);
        cmd.env("HARVESTER_PROXIES", to_json(&proxies)?);

        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        Ok(cmd)
    }
}

#[async_trait]
impl ChannelParser for CommandParser {
    async fn parse_channel(&self, request: &ParseRequest) -> Result<()> {
        let channel_id = request.channel.channel_id;
        let mut cmd = self.build_command(request).await?;

        debug!(
            channel_id,
            url = %request.channel.url,
            refresh = request.refresh_session,
            "启动采集命令"
        );
        let start_time = Instant::now();

        let child = cmd
            .spawn()
            .map_err(|e| HarvesterError::Parser(format!("启动采集命令失败: {e}")))?;

        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                output.map_err(|e| HarvesterError::Parser(format!("等待采集命令结束失败: {e}")))?
            }
            Err(_) => {
                return Err(HarvesterError::Parser(format!(
                    "采集命令超时（{}秒）",
                    self.config.timeout_seconds
                )))
            }
        };

        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        if output.status.success() {
            info!(channel_id, elapsed_ms, "采集命令执行成功");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        Err(HarvesterError::Parser(format!(
            "采集命令失败，退出码: {:?}，stderr: {}",
            output.status.code(),
            tail.join(" | ")
        )))
    }

    async fn prepare_sessions(&self, accounts: &[String]) -> Result<()> {
        let filtered: Vec<String> = accounts
            .iter()
            .filter(|account| !account.trim().is_empty())
            .cloned()
            .collect();

        if filtered.is_empty() {
            warn!("批次账号列表为空，采集命令将以匿名方式运行");
        } else {
            info!(accounts = filtered.len(), "已为批次准备账号");
        }

        *self.accounts.write().await = filtered;
        Ok(())
    }

    async fn configure_proxies(&self, proxies: &[String]) -> Result<()> {
        let filtered: Vec<String> = proxies
            .iter()
            .filter(|proxy| !proxy.trim().is_empty())
            .cloned()
            .collect();

        debug!(proxies = filtered.len(), "更新代理列表");
        *self.proxies.write().await = filtered;
        Ok(())
    }
}

fn to_json(values: &[String]) -> Result<String> {
    serde_json::to_string(values)
        .map_err(|e| HarvesterError::Serialization(format!("序列化参数失败: {e}")))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use harvester_core::ChannelTask;

    fn shell_parser(script: &str, timeout_seconds: u64) -> CommandParser {
        CommandParser::new(ParserConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "harvest".to_string()],
            working_dir: None,
            timeout_seconds,
        })
    }

    fn request(channel_id: i64) -> ParseRequest {
        ParseRequest {
            channel: ChannelTask::new(channel_id, "https://www.instagram.com/someone/"),
            accounts: vec![],
            proxy_list: vec![],
            collect_attempts: 3,
            refresh_session: false,
        }
    }

    #[tokio::test]
    async fn test_exit_code_decides_outcome() {
        let parser = shell_parser(r#"[ "$4" = "42" ]"#, 10);

        assert!(parser.parse_channel(&request(42)).await.is_ok());
        assert!(matches!(
            parser.parse_channel(&request(7)).await,
            Err(HarvesterError::Parser(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_flag_follows_the_request() {
        let parser = shell_parser(
            r#"for a in "$@"; do [ "$a" = "--refresh-session" ] && exit 9; done; exit 0"#,
            10,
        );

        let refreshing = ParseRequest {
            refresh_session: true,
            ..request(1)
        };
        assert!(parser.parse_channel(&request(1)).await.is_ok());
        assert!(parser.parse_channel(&refreshing).await.is_err());
        // 另一个频道的请求不受影响
        assert!(parser.parse_channel(&request(2)).await.is_ok());
        assert!(parser.parse_channel(&refreshing).await.is_err());
    }

    #[tokio::test]
    async fn test_prepared_accounts_are_exported() {
        let parser = shell_parser(r#"[ "$HARVESTER_ACCOUNTS" = '["acc1:pw"]' ]"#, 10);

        assert!(parser.parse_channel(&request(1)).await.is_err());
        parser
            .prepare_sessions(&["acc1:pw".to_string(), "".to_string()])
            .await
            .unwrap();
        assert!(parser.parse_channel(&request(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let parser = shell_parser("sleep 5", 1);
        let err = parser.parse_channel(&request(1)).await.unwrap_err();
        assert!(err.to_string().contains("超时"));
    }

    #[tokio::test]
    async fn test_missing_command_is_error() {
        let parser = CommandParser::new(ParserConfig {
            command: "/nonexistent/harvest-channel".to_string(),
            ..Default::default()
        });
        assert!(parser.parse_channel(&request(1)).await.is_err());
    }
}
