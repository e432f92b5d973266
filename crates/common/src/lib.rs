//! Shared identifier types.

mod types;

pub use types::{AggregateId, Version};
