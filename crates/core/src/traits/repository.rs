//! 数据仓储层接口定义
//!
//! 频道、账号和代理由管理后台维护，这里只读。

use async_trait::async_trait;

use crate::{
    models::{Account, ChannelRecord, Proxy},
    Result,
};

/// 频道仓储接口
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    /// 所有频道，按 `(created_at, id)` 排序
    async fn get_all(&self) -> Result<Vec<ChannelRecord>>;

    async fn get_by_id(&self, id: i64) -> Result<Option<ChannelRecord>>;

    async fn get_active_accounts(&self) -> Result<Vec<Account>>;

    async fn get_active_proxies(&self) -> Result<Vec<Proxy>>;
}
