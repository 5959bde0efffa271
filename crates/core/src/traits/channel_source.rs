use async_trait::async_trait;

use crate::{models::ChannelTask, Result};

/// 外部频道列表接口
#[async_trait]
pub trait ChannelLister: Send + Sync {
    /// 获取待采集的频道列表，传输或鉴权失败返回错误
    async fn fetch_channels(&self) -> Result<Vec<ChannelTask>>;
}

/// 批次完成通知
#[async_trait]
pub trait ReleaseNotifier: Send + Sync {
    async fn notify_release(&self, batch_id: &str) -> Result<()>;
}
