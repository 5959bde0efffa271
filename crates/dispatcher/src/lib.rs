//! 调度端：周期任务注册表、周期采集调度和任务投递

pub mod job_registry;
pub mod producer;
pub mod scheduler;

pub use job_registry::{JobFn, JobRegistry};
pub use producer::TaskProducer;
pub use scheduler::{
    channel_job_id, FireOutcome, LocalReleaseNotifier, RecurringScheduler, BATCH_JOB_ID,
};
