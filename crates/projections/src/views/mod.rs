//! Read model views for the query side.

pub mod account_activity;
pub mod account_summary;

pub use account_activity::{AccountActivityView, ActivityEntry};
pub use account_summary::{AccountSummary, AccountSummaryView};
