pub mod batch_runner;
pub mod consumer;
pub mod parser;

pub use batch_runner::{BatchReport, BatchRequest, BatchRunner, ChannelOutcome};
pub use consumer::{TaskConsumer, TaskHandler};
pub use parser::CommandParser;
