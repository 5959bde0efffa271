//! # 数据模型
//!
//! - [`TaskMessage`] 队列中的任务消息，单频道任务和批次任务共用同一结构
//! - [`ChannelTask`] 批次中的一个频道，以 `channel_id` 为标识
//! - [`ChannelRecord`] / [`Account`] / [`Proxy`] 数据库中的频道、账号和代理
//! - [`BatchSettings`] 批次运行时生效的参数
//!
//! 所有模型都实现了 `serde` 序列化，消息体为 JSON。

pub mod batch;
pub mod channel;
pub mod task;

pub use batch::BatchSettings;
pub use channel::{Account, ChannelRecord, Proxy, SourceType};
pub use task::{ChannelTask, TaskMessage, TaskType};
