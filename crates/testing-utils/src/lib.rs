//! # Harvester Testing Utils
//!
//! Shared testing utilities: in-memory mocks of every collaborator trait and
//! builders for test data.
//!
//! ```toml
//! [dev-dependencies]
//! harvester-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
