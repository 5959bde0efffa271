//! 周期采集调度
//!
//! 启动时读取全部频道，等待一段宽限期后为每个频道注册一个 `task_<id>` 周期任务，
//! 相邻频道的首次触发错开 `stagger_minutes`。批次类型的频道不单独注册，
//! 而是由一个 `instagram_batch_job` 统一打包成批次任务。
//!
//! 批次投递后进入批次锁：锁定期间其他频道的周期触发被推迟（每个频道只记一次），
//! 收到批次释放或锁超时后再依次投递。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use harvester_core::{
    config::DispatcherConfig, ChannelRecord, ChannelRepository, HarvesterError, Proxy,
    ReleaseNotifier, Result, SourceType,
};
use harvester_infrastructure::{observability, ReconnectPolicy};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::job_registry::{JobFn, JobRegistry};
use crate::producer::TaskProducer;

pub const BATCH_JOB_ID: &str = "instagram_batch_job";

/// 批次释放后推迟任务的投递间隔
const DEFERRED_FIRE_SPACING: Duration = Duration::from_secs(1);

pub fn channel_job_id(channel_id: i64) -> String {
    format!("task_{channel_id}")
}

/// 一次周期触发的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Published,
    /// 批次锁定中，等批次释放后再投递
    Deferred,
    /// 频道已被删除，对应的周期任务随之移除
    ChannelRemoved,
}

struct ActiveBatch {
    batch_id: String,
    started_at: DateTime<Utc>,
    auto_release: JoinHandle<()>,
}

#[derive(Default)]
struct BatchGate {
    active: Option<ActiveBatch>,
    /// 按推迟顺序排列，不重复
    pending: Vec<i64>,
}

pub struct RecurringScheduler {
    repository: Arc<dyn ChannelRepository>,
    producer: Arc<TaskProducer>,
    registry: Arc<JobRegistry>,
    interval: Duration,
    startup_delay: Duration,
    stagger: Duration,
    batch_source: Option<SourceType>,
    batch_lock_timeout: Duration,
    retry_policy: ReconnectPolicy,
    gate: Mutex<BatchGate>,
}

impl RecurringScheduler {
    pub fn new(
        repository: Arc<dyn ChannelRepository>,
        producer: Arc<TaskProducer>,
        registry: Arc<JobRegistry>,
        config: &DispatcherConfig,
    ) -> Result<Self> {
        let batch_source = config
            .batch_source
            .as_deref()
            .map(str::parse::<SourceType>)
            .transpose()?;

        Ok(Self {
            repository,
            producer,
            registry,
            interval: Duration::from_secs(config.interval_hours.saturating_mul(3600)),
            startup_delay: Duration::from_secs(config.startup_delay_seconds),
            stagger: Duration::from_secs(config.stagger_minutes.saturating_mul(60)),
            batch_source,
            batch_lock_timeout: Duration::from_secs(
                config.batch_lock_timeout_minutes.saturating_mul(60),
            ),
            retry_policy: ReconnectPolicy::default(),
            gate: Mutex::new(BatchGate::default()),
        })
    }

    /// 启动时读取频道失败后的重试策略
    pub fn with_retry_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// 运行调度器直到收到关闭信号
    ///
    /// 先读取频道（失败时按退避重试），宽限期结束后注册周期任务。
    /// 读取重试和宽限期内收到关闭信号都直接退出。
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let channels = tokio::select! {
            _ = shutdown.recv() => {
                info!("调度器在读取频道时收到关闭信号");
                return Ok(());
            }
            channels = self.load_channels() => channels?,
        };
        info!(
            channels = channels.len(),
            delay_secs = self.startup_delay.as_secs(),
            "已读取频道，等待宽限期后恢复周期任务"
        );

        tokio::select! {
            _ = shutdown.recv() => {
                info!("调度器在宽限期内收到关闭信号");
                return Ok(());
            }
            _ = tokio::time::sleep(self.startup_delay) => {}
        }

        let registered = self.restore_jobs(&channels);
        info!(registered, "周期任务恢复完成");

        let _ = shutdown.recv().await;
        self.registry.shutdown();
        if let Some(active) = self.gate().active.take() {
            active.auto_release.abort();
        }
        info!("调度器已停止");
        Ok(())
    }

    /// 读取全部频道，数据库暂时不可用时按重试策略等待
    async fn load_channels(&self) -> Result<Vec<ChannelRecord>> {
        let mut attempt = 0;
        loop {
            match self.repository.get_all().await {
                Ok(channels) => return Ok(channels),
                Err(e) => {
                    attempt += 1;
                    if !self.retry_policy.should_retry(attempt) {
                        error!(attempt, error = %e, "读取频道失败，已达到最大重试次数");
                        return Err(e);
                    }
                    let delay = self.retry_policy.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "读取频道失败，稍后重试"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// 为给定频道注册周期任务，返回新注册的任务数
    ///
    /// 频道按 `(created_at, id)` 排序，第 N 个频道首次触发延迟 N × stagger。
    pub fn restore_jobs(self: &Arc<Self>, channels: &[ChannelRecord]) -> usize {
        let mut ordered: Vec<&ChannelRecord> = channels.iter().collect();
        ordered.sort_by_key(|channel| (channel.created_at, channel.id));

        let (batched, individual): (Vec<&ChannelRecord>, Vec<&ChannelRecord>) = ordered
            .into_iter()
            .partition(|channel| Some(channel.source_type) == self.batch_source);

        let mut registered = 0;
        for (index, channel) in individual.iter().enumerate() {
            if self.schedule_channel(channel.id, self.stagger * index as u32) {
                registered += 1;
            }
        }

        if let Some(source) = self.batch_source {
            let first_delay = self.stagger * individual.len() as u32;
            if self.schedule_batch(first_delay) {
                registered += 1;
            }
            info!(
                source = %source,
                channels = batched.len(),
                "批次类型频道由批次任务统一调度"
            );
        }

        registered
    }

    /// 注册单个频道的周期任务，已存在时返回 false
    pub fn schedule_channel(self: &Arc<Self>, channel_id: i64, first_delay: Duration) -> bool {
        let scheduler = Arc::clone(self);
        let job: JobFn = Arc::new(move || {
            let scheduler = scheduler.clone();
            async move {
                if let Err(e) = scheduler.fire_channel(channel_id).await {
                    error!(error = %e, "周期采集任务执行失败");
                }
            }
            .instrument(info_span!("recurring_job", channel_id))
            .boxed()
        });

        self.registry.add_recurring_job(
            channel_job_id(channel_id),
            self.interval,
            first_delay,
            job,
        )
    }

    fn schedule_batch(self: &Arc<Self>, first_delay: Duration) -> bool {
        let scheduler = Arc::clone(self);
        let job: JobFn = Arc::new(move || {
            let scheduler = scheduler.clone();
            async move {
                if let Err(e) = scheduler.dispatch_batch().await {
                    error!(error = %e, "批次任务投递失败");
                }
            }
            .instrument(info_span!("recurring_job", job_id = BATCH_JOB_ID))
            .boxed()
        });

        self.registry
            .add_recurring_job(BATCH_JOB_ID, self.interval, first_delay, job)
    }

    /// 周期触发：重新读取频道并投递一个新的单频道任务
    ///
    /// 批次锁定期间非批次类型的频道只记录下来，等批次释放后再投递。
    pub async fn fire_channel(&self, channel_id: i64) -> Result<FireOutcome> {
        let Some(channel) = self.repository.get_by_id(channel_id).await? else {
            warn!(channel_id, "频道已不存在，移除周期任务");
            self.registry.remove_job(&channel_job_id(channel_id));
            return Ok(FireOutcome::ChannelRemoved);
        };

        if Some(channel.source_type) != self.batch_source
            && self.defer_if_batch_active(channel_id)
        {
            return Ok(FireOutcome::Deferred);
        }

        let accounts = self.active_accounts().await?;
        let proxies = proxies_for(
            channel.source_type,
            &self.repository.get_active_proxies().await?,
        );

        self.producer
            .publish_channel(&channel, accounts, proxies)
            .await?;
        observability::record_job_fired("channel");
        Ok(FireOutcome::Published)
    }

    /// 把批次类型的全部频道打包成一个批次任务投递
    ///
    /// 没有频道或没有可用账号时不投递并返回 None。投递成功后进入批次锁。
    pub async fn dispatch_batch(self: &Arc<Self>) -> Result<Option<String>> {
        let source = self.batch_source.ok_or_else(|| {
            HarvesterError::Configuration("未配置批次频道类型".to_string())
        })?;

        let channels: Vec<_> = self
            .repository
            .get_all()
            .await?
            .into_iter()
            .filter(|channel| channel.source_type == source)
            .map(|channel| channel.to_task())
            .collect();

        if channels.is_empty() {
            info!(source = %source, "没有批次类型的频道，跳过本次批次投递");
            return Ok(None);
        }

        let accounts = self.active_accounts().await?;
        if accounts.is_empty() {
            warn!(source = %source, "没有可用账号，跳过本次批次投递");
            return Ok(None);
        }

        let now = Utc::now();
        let batch_id = format!("{}-{}", now.format("%Y%m%d%H%M%S"), channels.len());
        let proxies = proxies_for(source, &self.repository.get_active_proxies().await?);

        info!(
            batch_id = %batch_id,
            channels = channels.len(),
            accounts = accounts.len(),
            proxies = proxies.len(),
            "投递批次任务"
        );
        self.producer
            .publish_batch(
                source,
                &batch_id,
                channels,
                accounts,
                proxies,
                Some(now.to_rfc3339()),
            )
            .await?;
        observability::record_job_fired("batch");

        self.activate_batch(&batch_id, now);
        Ok(Some(batch_id))
    }

    /// 当前持有批次锁的批次ID
    pub fn active_batch(&self) -> Option<String> {
        self.gate()
            .active
            .as_ref()
            .map(|active| active.batch_id.clone())
    }

    /// 批次锁定期间被推迟的频道
    pub fn pending_channels(&self) -> Vec<i64> {
        self.gate().pending.clone()
    }

    /// 释放批次锁并依次投递被推迟的频道
    ///
    /// 没有批次锁，或 `batch_id` 与当前批次不一致时返回 false。
    /// `batch_id` 为 None 时释放当前的批次。
    pub fn release_batch(self: &Arc<Self>, batch_id: Option<&str>) -> bool {
        let (released, pending) = {
            let mut gate = self.gate();
            let Some(active) = gate.active.as_ref() else {
                debug!(batch_id = ?batch_id, "没有进行中的批次，忽略释放请求");
                return false;
            };
            if let Some(requested) = batch_id {
                if requested != active.batch_id {
                    warn!(
                        requested,
                        active = %active.batch_id,
                        "释放请求与当前批次不一致，忽略"
                    );
                    return false;
                }
            }
            let Some(released) = gate.active.take() else {
                return false;
            };
            (released, std::mem::take(&mut gate.pending))
        };

        released.auto_release.abort();
        info!(
            batch_id = %released.batch_id,
            held_secs = (Utc::now() - released.started_at).num_seconds(),
            pending = pending.len(),
            "批次锁已释放"
        );
        self.flush_pending(pending);
        true
    }

    fn activate_batch(self: &Arc<Self>, batch_id: &str, started_at: DateTime<Utc>) {
        let scheduler = Arc::clone(self);
        let timer_batch_id = batch_id.to_string();
        let timeout = self.batch_lock_timeout;
        let auto_release = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if scheduler.release_batch(Some(&timer_batch_id)) {
                warn!(batch_id = %timer_batch_id, "批次锁超时，已自动释放");
            }
        });

        let previous = self.gate().active.replace(ActiveBatch {
            batch_id: batch_id.to_string(),
            started_at,
            auto_release,
        });
        if let Some(previous) = previous {
            previous.auto_release.abort();
            warn!(previous = %previous.batch_id, "上一个批次尚未释放，由新批次接管批次锁");
        }
        info!(batch_id, timeout_secs = timeout.as_secs(), "批次锁已建立");
    }

    /// 批次锁定中时记录频道并返回 true
    fn defer_if_batch_active(&self, channel_id: i64) -> bool {
        let mut gate = self.gate();
        let Some(batch_id) = gate.active.as_ref().map(|active| active.batch_id.clone()) else {
            return false;
        };
        if !gate.pending.contains(&channel_id) {
            gate.pending.push(channel_id);
        }
        info!(
            channel_id,
            batch_id = %batch_id,
            pending = gate.pending.len(),
            "批次进行中，推迟频道任务"
        );
        true
    }

    fn flush_pending(self: &Arc<Self>, pending: Vec<i64>) {
        if pending.is_empty() {
            return;
        }

        info!(count = pending.len(), "投递批次期间推迟的频道任务");
        let scheduler = Arc::clone(self);
        tokio::spawn(
            async move {
                for channel_id in pending {
                    tokio::time::sleep(DEFERRED_FIRE_SPACING).await;
                    if let Err(e) = scheduler.fire_channel(channel_id).await {
                        error!(channel_id, error = %e, "推迟的频道任务投递失败");
                    }
                }
            }
            .instrument(info_span!("deferred_fires")),
        );
    }

    fn gate(&self) -> MutexGuard<'_, BatchGate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn active_accounts(&self) -> Result<Vec<String>> {
        let accounts: Vec<String> = self
            .repository
            .get_active_accounts()
            .await?
            .into_iter()
            .map(|account| account.account_str)
            .collect();
        if accounts.is_empty() {
            warn!("没有可用的采集账号");
        }
        Ok(accounts)
    }
}

/// 进程内的批次释放通知：先释放调度器的批次锁，再转发给下游回调
///
/// 调度端和采集端运行在同一进程时使用。
pub struct LocalReleaseNotifier {
    scheduler: Arc<RecurringScheduler>,
    downstream: Arc<dyn ReleaseNotifier>,
}

impl LocalReleaseNotifier {
    pub fn new(scheduler: Arc<RecurringScheduler>, downstream: Arc<dyn ReleaseNotifier>) -> Self {
        Self {
            scheduler,
            downstream,
        }
    }
}

#[async_trait::async_trait]
impl ReleaseNotifier for LocalReleaseNotifier {
    async fn notify_release(&self, batch_id: &str) -> Result<()> {
        self.scheduler.release_batch(Some(batch_id));
        self.downstream.notify_release(batch_id).await
    }
}

/// likee 频道只使用 likee 专用代理，其他频道使用通用代理
fn proxies_for(source: SourceType, proxies: &[Proxy]) -> Vec<String> {
    let likee = source == SourceType::Likee;
    proxies
        .iter()
        .filter(|proxy| proxy.for_likee == likee)
        .map(|proxy| proxy.proxy_str.clone())
        .collect()
}
