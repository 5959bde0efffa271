use std::sync::Arc;

use futures::StreamExt;
use harvester_core::{
    config::BatchDefaults, ChannelParser, Delivery, HarvesterError, ParseRequest, Result,
    TaskMessage, TaskSubscriber, TaskType,
};
use harvester_infrastructure::{observability, ReconnectPolicy};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::batch_runner::{BatchRequest, BatchRunner};

/// 任务消息处理：按类型分发到单频道采集或批次运行器
pub struct TaskHandler {
    parser: Arc<dyn ChannelParser>,
    batch_runner: Arc<BatchRunner>,
    defaults: BatchDefaults,
}

impl TaskHandler {
    pub fn new(
        parser: Arc<dyn ChannelParser>,
        batch_runner: Arc<BatchRunner>,
        defaults: BatchDefaults,
    ) -> Self {
        Self {
            parser,
            batch_runner,
            defaults,
        }
    }

    /// 解码并处理一条原始消息
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<()> {
        let message = TaskMessage::from_bytes(payload)?;
        self.handle(message).await
    }

    pub async fn handle(&self, message: TaskMessage) -> Result<()> {
        observability::record_task_received(message.task_type.as_str());
        info!(
            task_type = message.task_type.as_str(),
            channel_id = ?message.channel_id,
            batch_id = ?message.batch_id,
            accounts = message.accounts.len(),
            proxies = message.proxy_list.len(),
            "收到任务"
        );

        match message.task_type {
            TaskType::Channel => self.handle_channel(&message).await,
            TaskType::InstagramBatch => {
                let request = BatchRequest::from_message(&message, &self.defaults);
                self.batch_runner.run(request).await.map(|_| ())
            }
            TaskType::Unknown => Err(HarvesterError::MalformedTask(
                "未知的任务类型".to_string(),
            )),
        }
    }

    /// 单频道任务，失败时按 `max_retries` 重试
    async fn handle_channel(&self, message: &TaskMessage) -> Result<()> {
        let channel = message.channel_target()?;
        let max_attempts = message
            .max_retries
            .unwrap_or(self.defaults.channel_max_retries)
            .max(1);
        let request = ParseRequest {
            channel,
            accounts: message.accounts.clone(),
            proxy_list: message.proxy_list.clone(),
            collect_attempts: message
                .collect_attempts
                .unwrap_or(self.defaults.collect_attempts)
                .max(1),
            refresh_session: false,
        };

        let mut last_error = None;
        for attempt in 1..=max_attempts {
            match self.parser.parse_channel(&request).await {
                Ok(()) => {
                    observability::record_channel_succeeded();
                    info!(channel_id = request.channel.channel_id, attempt, "频道采集完成");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        channel_id = request.channel.channel_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "频道采集失败"
                    );
                    last_error = Some(e);
                }
            }
        }

        observability::record_channel_failed();
        Err(last_error.unwrap_or_else(|| HarvesterError::Parser("频道采集失败".to_string())))
    }
}

/// 队列消费者
///
/// 一次只处理一条消息，处理结束后才确认。连接断开时按重连策略重新订阅，
/// 处理器的错误不会让消费循环退出。
pub struct TaskConsumer {
    subscriber: Arc<dyn TaskSubscriber>,
    handler: Arc<TaskHandler>,
    queue: String,
    consumer_tag: String,
    policy: ReconnectPolicy,
}

impl TaskConsumer {
    pub fn new(
        subscriber: Arc<dyn TaskSubscriber>,
        handler: Arc<TaskHandler>,
        queue: impl Into<String>,
        consumer_tag: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            subscriber,
            handler,
            queue: queue.into(),
            consumer_tag: consumer_tag.into(),
            policy,
        }
    }

    /// 运行消费循环直到收到关闭信号
    ///
    /// 仅当连续重连次数超过策略上限时返回错误。
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut failures: u32 = 0;

        loop {
            let subscribed = tokio::select! {
                _ = shutdown.recv() => break,
                subscribed = self.subscriber.subscribe(&self.queue, &self.consumer_tag) => subscribed,
            };

            match subscribed {
                Ok(mut deliveries) => {
                    failures = 0;
                    info!(queue = %self.queue, consumer = %self.consumer_tag, "等待任务");

                    loop {
                        let next = tokio::select! {
                            _ = shutdown.recv() => {
                                info!(consumer = %self.consumer_tag, "消费者收到关闭信号");
                                return Ok(());
                            }
                            next = deliveries.next() => next,
                        };

                        match next {
                            Some(Ok(delivery)) => self.process_delivery(delivery).await,
                            Some(Err(e)) => {
                                warn!(error = %e, "消息流出错，准备重连");
                                break;
                            }
                            None => {
                                warn!("消息流已关闭，准备重连");
                                break;
                            }
                        }
                    }
                    failures = failures.saturating_add(1);
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    if !self.policy.should_retry(failures) {
                        error!(attempts = failures, error = %e, "重连次数耗尽，消费者退出");
                        return Err(e);
                    }
                    warn!(attempt = failures, error = %e, "连接消息队列失败");
                }
            }

            let delay = self.policy.delay_for(failures);
            debug!(delay_ms = delay.as_millis() as u64, "等待后重连");
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(consumer = %self.consumer_tag, "消费者已停止");
        Ok(())
    }

    /// 处理一条投递，并保证在每条退出路径上确认或拒绝
    pub async fn process_delivery(&self, delivery: Delivery) {
        let Delivery {
            data,
            delivery_tag,
            acker,
        } = delivery;

        let handler = self.handler.clone();
        let outcome = tokio::spawn(async move { handler.handle_payload(&data).await }).await;

        let settled = match outcome {
            Ok(Ok(())) => acker.ack().await,
            Ok(Err(HarvesterError::MalformedTask(reason))) => {
                warn!(delivery_tag, reason = %reason, "无效的任务消息，确认后丢弃");
                acker.ack().await
            }
            Ok(Err(e)) => {
                error!(delivery_tag, error = %e, "任务处理失败");
                acker.ack().await
            }
            Err(e) => {
                error!(delivery_tag, error = %e, "任务处理异常终止，拒绝消息且不重新入队");
                acker.nack(false).await
            }
        };

        if let Err(e) = settled {
            warn!(delivery_tag, error = %e, "确认消息失败");
        }
    }
}
