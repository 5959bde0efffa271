//! 进程内周期任务注册表
//!
//! 每个任务是一个独立的 tokio 任务，按固定间隔重复执行。同一任务的两次执行
//! 不会重叠，执行时间超过间隔时下一次顺延。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 周期任务的执行体，每次触发调用一次
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册周期任务
    ///
    /// 首次在 `first_delay` 之后执行，之后每隔 `interval` 执行一次。
    /// 同名任务已存在时不做任何事并返回 false。
    pub fn add_recurring_job(
        &self,
        job_id: impl Into<String>,
        interval: Duration,
        first_delay: Duration,
        job: JobFn,
    ) -> bool {
        let job_id = job_id.into();
        let Ok(mut jobs) = self.jobs.lock() else {
            warn!(job_id = %job_id, "任务注册表锁已损坏");
            return false;
        };

        if jobs.get(&job_id).is_some_and(|handle| !handle.is_finished()) {
            debug!(job_id = %job_id, "任务已存在，跳过注册");
            return false;
        }

        let span_job_id = job_id.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + first_delay, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!(job_id = %span_job_id, "周期任务触发");
                job().await;
            }
        });

        info!(
            job_id = %job_id,
            interval_secs = interval.as_secs(),
            first_delay_secs = first_delay.as_secs(),
            "注册周期任务"
        );
        jobs.insert(job_id, handle);
        true
    }

    pub fn has_job(&self, job_id: &str) -> bool {
        self.jobs
            .lock()
            .map(|jobs| jobs.get(job_id).is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// 移除并停止任务，任务不存在时返回 false
    pub fn remove_job(&self, job_id: &str) -> bool {
        let removed = self
            .jobs
            .lock()
            .ok()
            .and_then(|mut jobs| jobs.remove(job_id));

        match removed {
            Some(handle) => {
                handle.abort();
                info!(job_id, "移除周期任务");
                true
            }
            None => false,
        }
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .jobs
            .lock()
            .map(|jobs| jobs.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 停止全部任务
    pub fn shutdown(&self) {
        let drained: Vec<(String, JoinHandle<()>)> = match self.jobs.lock() {
            Ok(mut jobs) => jobs.drain().collect(),
            Err(_) => return,
        };

        for (_, handle) in &drained {
            handle.abort();
        }
        info!(count = drained.len(), "已停止全部周期任务");
    }
}

impl Drop for JobRegistry {
    fn drop(&mut self) {
        if let Ok(jobs) = self.jobs.get_mut() {
            for handle in jobs.values() {
                handle.abort();
            }
        }
    }
}
