use async_trait::async_trait;

use crate::{models::ChannelTask, Result};

/// 一次频道采集请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRequest {
    pub channel: ChannelTask,
    pub accounts: Vec<String>,
    pub proxy_list: Vec<String>,
    /// 解析器内部对单次请求的尝试次数
    pub collect_attempts: u32,
    /// 本次尝试前丢弃缓存的登录状态，重新建立会话
    pub refresh_session: bool,
}

/// 外部采集能力
///
/// 具体的页面抓取逻辑不在本系统内，这里只关心成功与失败。
#[async_trait]
pub trait ChannelParser: Send + Sync {
    /// 采集单个频道
    async fn parse_channel(&self, request: &ParseRequest) -> Result<()>;

    /// 批次开始前为给定账号准备会话
    async fn prepare_sessions(&self, accounts: &[String]) -> Result<()>;

    /// 设置后续采集使用的代理列表
    async fn configure_proxies(&self, proxies: &[String]) -> Result<()>;
}
