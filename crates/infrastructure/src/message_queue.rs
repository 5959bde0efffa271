use async_trait::async_trait;
use futures::StreamExt;
use harvester_core::{
    config::MessageQueueConfig, Acknowledger, Delivery, DeliveryStream, HarvesterError,
    MessageQueue, Result, TaskMessage, TaskSubscriber,
};
use lapin::{
    acker::Acker, options::*, types::FieldTable, BasicProperties, Channel, Connection,
    ConnectionProperties, Queue,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 声明持久化队列
async fn declare_queue(channel: &Channel, queue_name: &str, durable: bool) -> Result<Queue> {
    let queue = channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable,
                exclusive: false,
                auto_delete: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| HarvesterError::MessageQueue(format!("声明队列 {queue_name} 失败: {e}")))?;

    debug!("队列 {} 声明成功", queue_name);
    Ok(queue)
}

async fn connect(url: &str) -> Result<Connection> {
    Connection::connect(url, ConnectionProperties::default())
        .await
        .map_err(|e| HarvesterError::MessageQueue(format!("连接RabbitMQ失败: {e}")))
}

/// RabbitMQ消息队列实现（生产端）
pub struct RabbitMQMessageQueue {
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
    declared: Mutex<HashSet<String>>,
}

impl RabbitMQMessageQueue {
    /// 创建新的RabbitMQ消息队列实例
    pub async fn new(config: &MessageQueueConfig) -> Result<Self> {
        let connection = connect(&config.url).await?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| HarvesterError::MessageQueue(format!("创建通道失败: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| HarvesterError::MessageQueue(format!("开启发布确认失败: {e}")))?;

        info!("成功连接到RabbitMQ（生产端）");

        Ok(Self {
            connection,
            channel: Arc::new(Mutex::new(channel)),
            declared: Mutex::new(HashSet::new()),
        })
    }

    /// 首次向某个队列发布前先声明它
    async fn ensure_queue(&self, channel: &Channel, queue: &str) -> Result<()> {
        let mut declared = self.declared.lock().await;
        if !declared.contains(queue) {
            declare_queue(channel, queue, true).await?;
            declared.insert(queue.to_string());
        }
        Ok(())
    }

    /// 关闭连接
    pub async fn close(&self) -> Result<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| HarvesterError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RabbitMQMessageQueue {
    async fn publish_message(&self, queue: &str, message: &TaskMessage) -> Result<()> {
        let channel = self.channel.lock().await;
        self.ensure_queue(&channel, queue).await?;
        let payload = message.to_bytes()?;

        let confirm = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| {
                HarvesterError::MessageQueue(format!("发布消息到队列 {queue} 失败: {e}"))
            })?;

        // 等待确认
        confirm
            .await
            .map_err(|e| HarvesterError::MessageQueue(format!("消息发布确认失败: {e}")))?;

        debug!(queue, task_type = message.task_type.as_str(), "消息已发布");
        Ok(())
    }

    async fn create_queue(&self, queue: &str, durable: bool) -> Result<()> {
        let channel = self.channel.lock().await;
        declare_queue(&channel, queue, durable).await?;
        self.declared.lock().await.insert(queue.to_string());
        Ok(())
    }
}

/// RabbitMQ订阅端，每次订阅建立独立的连接
///
/// 连接归返回的投递流所有，流被丢弃时连接随之关闭。
pub struct RabbitMQSubscriber {
    url: String,
    prefetch: u16,
}

impl RabbitMQSubscriber {
    pub fn new(config: &MessageQueueConfig) -> Self {
        Self {
            url: config.url.clone(),
            prefetch: config.prefetch,
        }
    }
}

#[async_trait]
impl TaskSubscriber for RabbitMQSubscriber {
    async fn subscribe(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let connection = connect(&self.url).await?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| HarvesterError::MessageQueue(format!("创建通道失败: {e}")))?;

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| HarvesterError::MessageQueue(format!("设置预取数失败: {e}")))?;

        declare_queue(&channel, queue, true).await?;

        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| HarvesterError::MessageQueue(format!("创建消费者失败: {e}")))?;

        info!(queue, consumer_tag, prefetch = self.prefetch, "已订阅队列");

        let stream = consumer.map(move |item| {
            // 保持连接与通道存活直到流被丢弃
            let _ = (&connection, &channel);
            item.map(|delivery| Delivery {
                data: delivery.data,
                delivery_tag: delivery.delivery_tag,
                acker: Box::new(LapinAcknowledger(delivery.acker)),
            })
            .map_err(|e| HarvesterError::MessageQueue(format!("接收消息失败: {e}")))
        });

        Ok(stream.boxed())
    }
}

struct LapinAcknowledger(Acker);

#[async_trait]
impl Acknowledger for LapinAcknowledger {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| HarvesterError::MessageQueue(format!("确认消息失败: {e}")))
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(|e| HarvesterError::MessageQueue(format!("拒绝消息失败: {e}")))
    }
}
