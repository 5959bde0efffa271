use async_trait::async_trait;
use std::collections::HashSet;

use crate::Result;

/// 批次进度存储，记录每个批次中已成功处理的频道
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// 读取已处理的频道，记录不存在或无法读取时返回空集合
    async fn load(&self, batch_id: &str) -> HashSet<i64>;

    /// 将频道标记为已处理，重复标记不改变存储内容
    async fn mark_processed(&self, batch_id: &str, channel_id: i64) -> Result<()>;

    /// 删除批次进度，记录不存在不视为错误
    async fn clear(&self, batch_id: &str) -> Result<()>;
}
