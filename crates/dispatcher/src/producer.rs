use std::sync::Arc;

use harvester_core::{
    ChannelRecord, ChannelTask, MessageQueue, Result, SourceType, TaskMessage,
};
use tracing::{debug, info, warn};

/// 任务生产者
///
/// 按频道类型把任务投递到 `<queue_prefix><type>` 队列。
pub struct TaskProducer {
    message_queue: Arc<dyn MessageQueue>,
    queue_prefix: String,
}

impl TaskProducer {
    pub fn new(message_queue: Arc<dyn MessageQueue>, queue_prefix: impl Into<String>) -> Self {
        Self {
            message_queue,
            queue_prefix: queue_prefix.into(),
        }
    }

    pub fn queue_for(&self, source: SourceType) -> String {
        source.queue_name(&self.queue_prefix)
    }

    /// 预先声明所有频道类型的队列
    pub async fn declare_queues(&self) -> Result<()> {
        for source in [
            SourceType::Youtube,
            SourceType::Tiktok,
            SourceType::Instagram,
            SourceType::Likee,
        ] {
            let queue = self.queue_for(source);
            self.message_queue.create_queue(&queue, true).await?;
            debug!(queue = %queue, "队列已声明");
        }
        Ok(())
    }

    pub async fn publish(&self, source: SourceType, message: &TaskMessage) -> Result<()> {
        let queue = self.queue_for(source);
        match self.message_queue.publish_message(&queue, message).await {
            Ok(()) => {
                info!(
                    queue = %queue,
                    task_type = message.task_type.as_str(),
                    channel_id = ?message.channel_id,
                    batch_id = ?message.batch_id,
                    "任务已投递"
                );
                Ok(())
            }
            Err(e) => {
                warn!(queue = %queue, error = %e, "任务投递失败");
                Err(e)
            }
        }
    }

    /// 投递单频道采集任务
    pub async fn publish_channel(
        &self,
        channel: &ChannelRecord,
        accounts: Vec<String>,
        proxy_list: Vec<String>,
    ) -> Result<()> {
        let message = TaskMessage::channel(&channel.to_task(), accounts, proxy_list);
        self.publish(channel.source_type, &message).await
    }

    /// 投递批次任务，返回投递的消息
    pub async fn publish_batch(
        &self,
        source: SourceType,
        batch_id: &str,
        channels: Vec<ChannelTask>,
        accounts: Vec<String>,
        proxy_list: Vec<String>,
        parse_started_at: Option<String>,
    ) -> Result<TaskMessage> {
        let mut message = TaskMessage::batch(batch_id, channels, accounts, proxy_list);
        message.parse_started_at = parse_started_at;
        self.publish(source, &message).await?;
        Ok(message)
    }
}
