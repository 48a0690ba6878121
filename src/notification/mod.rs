//! Delivery channels.
//!
//! Every channel implements [`ChannelAdapter`](crate::core::ChannelAdapter)
//! and classifies its own failures. The dispatcher only ever sees the
//! classification, never provider-specific detail.
pub mod adapters;
pub mod registry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod webhook;

pub use adapters::{EmailAdapter, PushAdapter, SmsAdapter};
pub use registry::AdapterRegistry;
pub use webhook::WebhookTransport;
