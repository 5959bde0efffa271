pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use errors::*;
pub use models::{
    Account, BatchSettings, ChannelRecord, ChannelTask, Proxy, SourceType, TaskMessage, TaskType,
};
pub use traits::{
    Acknowledger, ChannelLister, ChannelParser, ChannelRepository, Delivery, DeliveryStream,
    MessageQueue, ParseRequest, ProgressStore, ReleaseNotifier, TaskSubscriber,
};
