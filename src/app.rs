use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use harvester_core::{config::AppConfig, ChannelLister, ReleaseNotifier};
use harvester_dispatcher::{JobRegistry, LocalReleaseNotifier, RecurringScheduler, TaskProducer};
use harvester_infrastructure::{
    create_pool, FileProgressStore, HttpChannelLister, HttpReleaseNotifier,
    PostgresChannelRepository, RabbitMQMessageQueue, RabbitMQSubscriber, ReconnectPolicy,
};
use harvester_worker::{BatchRunner, CommandParser, TaskConsumer, TaskHandler};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行调度端
    Dispatcher,
    /// 仅运行采集端
    Worker,
    /// 运行所有组件
    All,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        info!(mode = ?mode, "初始化应用程序");
        Self { config, mode }
    }

    /// 运行应用程序直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!(mode = ?self.mode, "启动应用程序");

        match self.mode {
            AppMode::Dispatcher => {
                let dispatcher = self.build_dispatcher().await?;
                self.serve_dispatcher(dispatcher, shutdown_rx).await
            }
            AppMode::Worker => self.run_worker(None, shutdown_rx).await,
            AppMode::All => {
                let dispatcher = if self.config.dispatcher.enabled {
                    Some(self.build_dispatcher().await?)
                } else {
                    info!("Dispatcher已在配置中禁用");
                    None
                };
                // 同进程运行时批次释放直接解除调度器的批次锁
                let scheduler = dispatcher.as_ref().map(|(scheduler, _)| scheduler.clone());

                let dispatcher = async {
                    match dispatcher {
                        Some(dispatcher) => {
                            self.serve_dispatcher(dispatcher, shutdown_rx.resubscribe())
                                .await
                        }
                        None => Ok(()),
                    }
                };
                let worker = async {
                    if self.config.worker.enabled {
                        self.run_worker(scheduler, shutdown_rx.resubscribe()).await
                    } else {
                        info!("Worker已在配置中禁用");
                        Ok(())
                    }
                };

                let (dispatcher, worker) = tokio::join!(dispatcher, worker);
                dispatcher.context("Dispatcher运行失败")?;
                worker.context("Worker运行失败")?;
                Ok(())
            }
        }
    }

    /// 创建调度端的周期调度器和消息队列连接
    async fn build_dispatcher(
        &self,
    ) -> Result<(Arc<RecurringScheduler>, Arc<RabbitMQMessageQueue>)> {
        info!("启动Dispatcher服务");

        let pool = create_pool(&self.config.database)
            .await
            .context("创建数据库连接池失败")?;
        let repository = Arc::new(PostgresChannelRepository::new(pool));

        let message_queue = Arc::new(
            RabbitMQMessageQueue::new(&self.config.message_queue)
                .await
                .context("连接消息队列失败")?,
        );
        let producer = Arc::new(TaskProducer::new(
            message_queue.clone(),
            self.config.message_queue.queue_prefix.clone(),
        ));
        if let Err(e) = producer.declare_queues().await {
            warn!(error = %e, "声明队列失败，将在首次投递时重试");
        }

        let scheduler = Arc::new(
            RecurringScheduler::new(
                repository,
                producer,
                Arc::new(JobRegistry::new()),
                &self.config.dispatcher,
            )
            .context("创建周期调度器失败")?,
        );
        Ok((scheduler, message_queue))
    }

    /// 运行调度端：恢复周期任务并按间隔投递采集任务
    async fn serve_dispatcher(
        &self,
        (scheduler, message_queue): (Arc<RecurringScheduler>, Arc<RabbitMQMessageQueue>),
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        scheduler.run(shutdown_rx).await?;

        if let Err(e) = message_queue.close().await {
            warn!(error = %e, "关闭消息队列连接失败");
        }
        info!("Dispatcher服务已停止");
        Ok(())
    }

    /// 运行采集端：启动 `worker.consumers` 个并行消费者
    ///
    /// 传入同进程的调度器时，批次释放先解除它的批次锁再转发给回调接口。
    async fn run_worker(
        &self,
        scheduler: Option<Arc<RecurringScheduler>>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let worker_id = &self.config.worker.worker_id;
        info!(worker_id = %worker_id, queue = %self.config.message_queue.queue, "启动Worker服务");

        let parser = Arc::new(CommandParser::new(self.config.parser.clone()));
        let progress = Arc::new(FileProgressStore::new(&self.config.progress.base_dir));
        if self.config.progress.stale_after_hours > 0 {
            let max_age =
                Duration::from_secs(self.config.progress.stale_after_hours.saturating_mul(3600));
            if let Err(e) = progress.sweep_stale(max_age).await {
                warn!(error = %e, "清理过期进度文件失败");
            }
        }
        let lister = HttpChannelLister::from_config(&self.config.channels_api)?
            .map(|lister| Arc::new(lister) as Arc<dyn ChannelLister>);
        if lister.is_none() {
            warn!("未配置频道列表接口，不带频道的批次任务将失败");
        }
        let mut notifier: Arc<dyn ReleaseNotifier> =
            Arc::new(HttpReleaseNotifier::new(&self.config.release_callback)?);
        if let Some(scheduler) = scheduler {
            notifier = Arc::new(LocalReleaseNotifier::new(scheduler, notifier));
        }

        let runner = Arc::new(BatchRunner::new(
            parser.clone(),
            progress,
            lister,
            notifier,
        ));
        let handler = Arc::new(TaskHandler::new(
            parser,
            runner,
            self.config.batch.clone(),
        ));
        let subscriber = Arc::new(RabbitMQSubscriber::new(&self.config.message_queue));
        let policy = ReconnectPolicy::from_config(&self.config.message_queue);
        let host = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let handles: Vec<_> = (1..=self.config.worker.consumers)
            .map(|index| {
                let consumer = TaskConsumer::new(
                    subscriber.clone(),
                    handler.clone(),
                    self.config.message_queue.queue.clone(),
                    format!("{worker_id}@{host}-{index}"),
                    policy.clone(),
                );
                let shutdown_rx = shutdown_rx.resubscribe();
                tokio::spawn(async move { consumer.run(shutdown_rx).await })
            })
            .collect();

        for result in join_all(handles).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "消费者异常退出"),
                Err(e) => error!(error = %e, "消费者任务崩溃"),
            }
        }

        info!(worker_id = %worker_id, "Worker服务已停止");
        Ok(())
    }
}
