//! 采集流程各阶段的指标
//!
//! 指标通过 `metrics` 门面记录，是否导出由二进制启动时安装的 recorder 决定。

use metrics::{counter, histogram};
use std::time::Duration;

pub fn record_task_received(task_type: &str) {
    counter!("harvester_tasks_received_total", "task_type" => task_type.to_string()).increment(1);
}

pub fn record_channel_succeeded() {
    counter!("harvester_channels_succeeded_total").increment(1);
}

pub fn record_channel_failed() {
    counter!("harvester_channels_failed_total").increment(1);
}

pub fn record_wave(size: usize) {
    counter!("harvester_waves_total").increment(1);
    histogram!("harvester_wave_size").record(size as f64);
}

pub fn record_batch_completed(timed_out: bool, duration: Duration) {
    let status = if timed_out { "timed_out" } else { "completed" };
    counter!("harvester_batches_completed_total", "status" => status).increment(1);
    histogram!("harvester_batch_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_release_notification(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("harvester_release_notifications_total", "outcome" => outcome).increment(1);
}

pub fn record_job_fired(job_kind: &'static str) {
    counter!("harvester_jobs_fired_total", "kind" => job_kind).increment(1);
}
