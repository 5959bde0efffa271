//! 批次分波采集
//!
//! 一个批次的频道被切分为若干波，波内并发、波间串行并暂停，每个成功的频道
//! 立即写入进度存储。进程重启后再次收到同一 `batch_id` 时，已完成的频道会被跳过。

use std::sync::Arc;
use std::time::Duration;

use harvester_core::{
    config::BatchDefaults, BatchSettings, ChannelLister, ChannelParser, ChannelTask,
    HarvesterError, ParseRequest, ProgressStore, ReleaseNotifier, Result, TaskMessage,
};
use harvester_infrastructure::observability;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// 一次批次运行的输入
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub batch_id: String,
    /// None 表示从频道列表接口获取
    pub channels: Option<Vec<ChannelTask>>,
    pub accounts: Vec<String>,
    pub proxy_list: Vec<String>,
    pub parse_started_at: Option<String>,
    pub settings: BatchSettings,
}

impl BatchRequest {
    pub fn from_message(message: &TaskMessage, defaults: &BatchDefaults) -> Self {
        let batch_id = match message.batch_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let generated = format!("adhoc-{}", Uuid::new_v4());
                warn!(batch_id = %generated, "批次消息缺少batch_id，生成临时ID，进度无法跨重启恢复");
                generated
            }
        };

        Self {
            batch_id,
            channels: message.inline_channels(),
            accounts: message.accounts.clone(),
            proxy_list: message.proxy_list.clone(),
            parse_started_at: message.parse_started_at.clone(),
            settings: BatchSettings::resolve(message, defaults),
        }
    }
}

/// 单个频道的最终结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    Succeeded,
    Failed,
}

/// 批次运行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: String,
    pub total_channels: usize,
    /// 之前的运行中已完成而被跳过的频道
    pub skipped: Vec<i64>,
    /// 实际执行的波次，每波为频道ID列表
    pub waves: Vec<Vec<i64>>,
    pub succeeded: Vec<i64>,
    pub failed: Vec<i64>,
    pub timed_out: bool,
    pub progress_cleared: bool,
}

/// 批次运行器
#[derive(Clone)]
pub struct BatchRunner {
    parser: Arc<dyn ChannelParser>,
    progress: Arc<dyn ProgressStore>,
    lister: Option<Arc<dyn ChannelLister>>,
    notifier: Arc<dyn ReleaseNotifier>,
}

impl BatchRunner {
    pub fn new(
        parser: Arc<dyn ChannelParser>,
        progress: Arc<dyn ProgressStore>,
        lister: Option<Arc<dyn ChannelLister>>,
        notifier: Arc<dyn ReleaseNotifier>,
    ) -> Self {
        Self {
            parser,
            progress,
            lister,
            notifier,
        }
    }

    /// 运行批次直到结束
    ///
    /// 无论执行结果如何都会通知释放接口，执行过程中的 panic 也不例外；
    /// 只有在所有波次都执行完时才清除进度，超时中止的批次保留进度以便下次继续。
    pub async fn run(&self, request: BatchRequest) -> Result<BatchReport> {
        let span = info_span!("batch", batch_id = %request.batch_id);
        async move {
            let started = Instant::now();
            let runner = self.clone();
            let execution = request.clone();
            let result = match tokio::spawn(
                async move { runner.execute(&execution).await }.in_current_span(),
            )
            .await
            {
                Ok(result) => result,
                Err(e) => Err(HarvesterError::Internal(format!("批次执行异常退出: {e}"))),
            };

            self.notify_release(&request.batch_id).await;

            match result {
                Ok(mut report) => {
                    if report.timed_out {
                        warn!(
                            remaining = report
                                .total_channels
                                .saturating_sub(report.skipped.len() + report.succeeded.len()),
                            "批次超时，保留进度等待下次继续"
                        );
                    } else {
                        report.progress_cleared = self.clear_progress(&request.batch_id).await;
                    }

                    observability::record_batch_completed(report.timed_out, started.elapsed());
                    info!(
                        total = report.total_channels,
                        skipped = report.skipped.len(),
                        succeeded = report.succeeded.len(),
                        failed = report.failed.len(),
                        waves = report.waves.len(),
                        "批次结束"
                    );
                    Ok(report)
                }
                Err(e) => {
                    error!(error = %e, "批次中止");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, request: &BatchRequest) -> Result<BatchReport> {
        let settings = &request.settings;
        let channels = self.resolve_channels(request).await?;

        let processed = self.progress.load(&request.batch_id).await;
        let (skipped, remaining): (Vec<ChannelTask>, Vec<ChannelTask>) = channels
            .iter()
            .cloned()
            .partition(|task| processed.contains(&task.channel_id));

        let mut report = BatchReport {
            batch_id: request.batch_id.clone(),
            total_channels: channels.len(),
            skipped: skipped.iter().map(|task| task.channel_id).collect(),
            ..Default::default()
        };

        if !skipped.is_empty() {
            info!(skipped = skipped.len(), "跳过此前已完成的频道");
        }
        if remaining.is_empty() {
            info!("没有待采集的频道");
            return Ok(report);
        }

        if let Err(e) = self.parser.configure_proxies(&request.proxy_list).await {
            warn!(error = %e, "设置代理列表失败");
        }
        if request.accounts.is_empty() {
            warn!("批次未携带账号");
        }
        if let Err(e) = self.parser.prepare_sessions(&request.accounts).await {
            warn!(error = %e, "准备账号会话失败");
        }

        let deadline = settings.batch_timeout.and_then(|timeout| {
            let deadline = Instant::now().checked_add(timeout);
            if deadline.is_none() {
                warn!(timeout_secs = timeout.as_secs(), "批次超时过大，按不限时处理");
            }
            deadline
        });
        let waves: Vec<&[ChannelTask]> = remaining.chunks(settings.channels_per_wave).collect();
        let wave_count = waves.len();
        info!(
            remaining = remaining.len(),
            waves = wave_count,
            channels_per_wave = settings.channels_per_wave,
            "开始分波采集"
        );

        for (index, wave) in waves.into_iter().enumerate() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                report.timed_out = true;
                break;
            }

            let outcomes = self
                .run_wave(request, index + 1, wave_count, wave)
                .await;

            report
                .waves
                .push(wave.iter().map(|task| task.channel_id).collect());
            for (channel_id, outcome) in outcomes {
                match outcome {
                    ChannelOutcome::Succeeded => report.succeeded.push(channel_id),
                    ChannelOutcome::Failed => report.failed.push(channel_id),
                }
            }

            if index + 1 < wave_count && !settings.pause_between_waves.is_zero() {
                let pause = settings.pause_between_waves.min(BatchSettings::MAX_WAIT);
                let now = Instant::now();
                let wake_at = now
                    .checked_add(pause)
                    .unwrap_or_else(|| now + BatchSettings::MAX_WAIT);
                if let Some(deadline) = deadline.filter(|deadline| *deadline <= wake_at) {
                    sleep_until(deadline).await;
                    report.timed_out = true;
                    break;
                }
                info!(pause_seconds = pause.as_secs(), "波次间暂停");
                sleep_until(wake_at).await;
            }
        }

        Ok(report)
    }

    async fn resolve_channels(&self, request: &BatchRequest) -> Result<Vec<ChannelTask>> {
        if let Some(ref channels) = request.channels {
            info!(count = channels.len(), "使用消息中携带的频道列表");
            return Ok(channels.clone());
        }

        let Some(ref lister) = self.lister else {
            return Err(HarvesterError::ChannelListing(
                "批次未携带频道且未配置频道列表接口".to_string(),
            ));
        };

        let mut channels = lister.fetch_channels().await?;
        for task in &mut channels {
            if task.parse_started_at.is_none() {
                task.parse_started_at = request.parse_started_at.clone();
            }
        }
        info!(count = channels.len(), "从接口获取频道列表");
        Ok(channels)
    }

    async fn run_wave(
        &self,
        request: &BatchRequest,
        wave_number: usize,
        wave_count: usize,
        wave: &[ChannelTask],
    ) -> Vec<(i64, ChannelOutcome)> {
        info!(wave = wave_number, of = wave_count, size = wave.len(), "波次开始");
        observability::record_wave(wave.len());

        let handles: Vec<_> = wave
            .iter()
            .map(|task| {
                let job = ChannelJob {
                    parser: self.parser.clone(),
                    progress: self.progress.clone(),
                    batch_id: request.batch_id.clone(),
                    request: ParseRequest {
                        channel: task.clone(),
                        accounts: request.accounts.clone(),
                        proxy_list: request.proxy_list.clone(),
                        collect_attempts: request.settings.collect_attempts,
                        refresh_session: false,
                    },
                    attempts: request.settings.attempts_per_channel(),
                    refresh_on_failure: request.settings.session_refresh_on_failure,
                };
                let span = info_span!("channel", channel_id = task.channel_id);
                (task.channel_id, tokio::spawn(job.run().instrument(span)))
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (channel_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(channel_id, error = %e, "频道采集任务异常退出");
                    observability::record_channel_failed();
                    ChannelOutcome::Failed
                }
            };
            outcomes.push((channel_id, outcome));
        }

        let succeeded = outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == ChannelOutcome::Succeeded)
            .count();
        info!(
            wave = wave_number,
            succeeded,
            failed = outcomes.len() - succeeded,
            "波次结束"
        );
        outcomes
    }

    async fn notify_release(&self, batch_id: &str) {
        match self.notifier.notify_release(batch_id).await {
            Ok(()) => observability::record_release_notification(true),
            Err(e) => {
                observability::record_release_notification(false);
                warn!(error = %e, "批次释放通知失败");
            }
        }
    }

    async fn clear_progress(&self, batch_id: &str) -> bool {
        match self.progress.clear(batch_id).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "清除批次进度失败");
                false
            }
        }
    }
}

/// 单个频道的采集与重试
struct ChannelJob {
    parser: Arc<dyn ChannelParser>,
    progress: Arc<dyn ProgressStore>,
    batch_id: String,
    request: ParseRequest,
    attempts: u32,
    refresh_on_failure: bool,
}

impl ChannelJob {
    async fn run(mut self) -> ChannelOutcome {
        for attempt in 1..=self.attempts {
            match self.parser.parse_channel(&self.request).await {
                Ok(()) => {
                    self.mark_processed().await;
                    observability::record_channel_succeeded();
                    info!(attempt, "频道采集成功");
                    return ChannelOutcome::Succeeded;
                }
                Err(e) => {
                    warn!(attempt, max_attempts = self.attempts, error = %e, "频道采集失败");
                    // 会话刷新只作用于本频道的下一次尝试
                    self.request.refresh_session = self.refresh_on_failure;
                    if attempt < self.attempts && self.refresh_on_failure {
                        debug!("重试前刷新会话");
                    }
                }
            }
        }

        observability::record_channel_failed();
        error!(attempts = self.attempts, "频道重试次数耗尽");
        ChannelOutcome::Failed
    }

    /// 写入失败时重试一次，仍失败只记录日志
    async fn mark_processed(&self) {
        let channel_id = self.request.channel.channel_id;
        if let Err(e) = self.progress.mark_processed(&self.batch_id, channel_id).await {
            warn!(error = %e, "记录进度失败，重试一次");
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Err(e) = self.progress.mark_processed(&self.batch_id, channel_id).await {
                error!(error = %e, "记录进度失败，重启后该频道可能被重复采集");
            }
        }
    }
}
