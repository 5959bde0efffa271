pub mod channels_api;
pub mod release_notifier;

pub use channels_api::HttpChannelLister;
pub use release_notifier::HttpReleaseNotifier;

use harvester_core::{HarvesterError, Result};
use std::time::Duration;

pub(crate) fn build_client(timeout_seconds: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| HarvesterError::Http(format!("创建HTTP客户端失败: {e}")))
}
