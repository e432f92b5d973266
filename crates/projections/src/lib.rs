//! Read models for the query side.
//!
//! This crate provides:
//! - [`Projection`] trait for turning committed events into read models,
//!   registered with the event dispatcher through [`ProjectionHandler`]
//! - [`ProjectionProcessor`] for filling or rebuilding views from the outbox
//! - two views: account summaries and account activity
//! - queries answered from those views

pub mod error;
pub mod processor;
pub mod projection;
pub mod queries;
pub mod read_model;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionHandler, ProjectionPosition};
pub use queries::{
    AccountActivityQueries, AccountSummaryQueries, GetAccountActivity, GetAccountSummary,
    ListAccounts, MAX_ACTIVITY_LIMIT, register_projection_queries,
};
pub use read_model::ReadModel;
pub use views::{AccountActivityView, AccountSummary, AccountSummaryView, ActivityEntry};
