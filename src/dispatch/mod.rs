//! Delivery of queued requests through channel adapters.
//!
//! The [`Dispatcher`] performs delivery attempts, records every attempt in the
//! ledger before acknowledging it, and schedules retries for transient
//! failures according to the [`RetryPolicy`].

pub mod backoff;
pub mod dispatcher;

use crate::core::ChannelKind;
use crate::ledger::LedgerError;
use thiserror::Error;

pub use backoff::RetryPolicy;
pub use dispatcher::Dispatcher;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no channel adapter registered for {0:?}")]
    UnknownChannel(ChannelKind),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
