//! Telenotify - notification dispatch and delivery tracking
//!
//! Producers submit [`NotificationRequest`]s through a [`Notifier`]. Requests
//! wait in a bounded priority queue, a pool of workers delivers them through
//! the channel adapters, and every attempt lands in the delivery ledger.

pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod internal_metrics;
pub mod ledger;
pub mod notification;
pub mod producers;
pub mod queue;
pub mod task_manager;

// Re-export core types for convenience
pub use app::{App, AppBuilder, NotFound, Notifier, SubmitError};
pub use core::*;
