pub mod channel_source;
pub mod message_queue;
pub mod parser;
pub mod progress;
pub mod repository;

pub use channel_source::*;
pub use message_queue::*;
pub use parser::*;
pub use progress::*;
pub use repository::*;
