pub mod channel_repository;

pub use channel_repository::{create_pool, PostgresChannelRepository};
