use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{models::TaskMessage, Result};

/// 消息队列抽象接口（生产端）
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 发布消息到指定队列
    async fn publish_message(&self, queue: &str, message: &TaskMessage) -> Result<()>;

    /// 创建队列
    async fn create_queue(&self, queue: &str, durable: bool) -> Result<()>;
}

/// 单条投递的确认句柄
///
/// 每条投递必须在所有退出路径上恰好调用一次 `ack` 或 `nack`。
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;

    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// 从队列收到的一条投递
pub struct Delivery {
    pub data: Vec<u8>,
    pub delivery_tag: u64,
    pub acker: Box<dyn Acknowledger>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("len", &self.data.len())
            .finish()
    }
}

/// 投递流，流结束或产出错误表示连接已断开
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// 消息队列抽象接口（消费端）
#[async_trait]
pub trait TaskSubscriber: Send + Sync {
    /// 建立连接并订阅队列，预取数为1，手动确认
    async fn subscribe(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;
}
