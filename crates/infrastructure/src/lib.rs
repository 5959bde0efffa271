pub mod database;
pub mod http;
pub mod message_queue;
pub mod observability;
pub mod progress_store;
pub mod reconnect;

pub use database::*;
pub use http::*;
pub use message_queue::*;
pub use progress_store::*;
pub use reconnect::*;
