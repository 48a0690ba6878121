//! Core domain types and service traits for telenotify
//!
//! This module defines the notification request, the delivery records kept by
//! the ledger, and the trait contract every delivery channel implements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Identifies a delivery channel. Adapters are registered under this name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ChannelKind(String);

impl ChannelKind {
    pub const EMAIL: &'static str = "email";
    pub const SMS: &'static str = "sms";
    pub const PUSH: &'static str = "push";

    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into().to_ascii_lowercase())
    }

    pub fn email() -> Self {
        Self::new(Self::EMAIL)
    }

    pub fn sms() -> Self {
        Self::new(Self::SMS)
    }

    pub fn push() -> Self {
        Self::new(Self::PUSH)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl From<String> for ChannelKind {
    fn from(kind: String) -> Self {
        Self::new(kind)
    }
}

impl From<ChannelKind> for String {
    fn from(kind: ChannelKind) -> Self {
        kind.0
    }
}

/// Delivery priority. Critical requests jump ahead of normal ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    #[default]
    Normal,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::Normal => "normal",
        }
    }
}

/// A request to deliver one notification to one recipient over one channel.
///
/// Requests are immutable once built; the dispatcher only ever reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub id: Uuid,
    pub recipient_id: String,
    pub channel: ChannelKind,
    pub payload: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    /// Collapses repeated submissions of the same logical notification.
    pub dedup_key: String,
}

impl NotificationRequest {
    /// Creates a request with a fresh id. The dedup key defaults to the id,
    /// which makes every request unique unless a key is supplied.
    pub fn new(
        recipient_id: impl Into<String>,
        channel: ChannelKind,
        payload: impl Into<String>,
        priority: Priority,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            recipient_id: recipient_id.into(),
            channel,
            payload: payload.into(),
            priority,
            created_at: Utc::now(),
            dedup_key: id.to_string(),
        }
    }

    pub fn with_dedup_key(mut self, dedup_key: impl Into<String>) -> Self {
        self.dedup_key = dedup_key.into();
        self
    }
}

/// Result state of an attempt or of a whole ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Success,
    TransientFailure,
    PermanentFailure,
}

impl Outcome {
    /// `Success` and `PermanentFailure` end an entry's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::PermanentFailure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pending => "pending",
            Outcome::Success => "success",
            Outcome::TransientFailure => "transient_failure",
            Outcome::PermanentFailure => "permanent_failure",
        }
    }
}

/// Classified failure of a send. This is all the dispatcher looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ChannelUnavailable,
    InvalidRecipient,
    PolicyExceeded,
}

impl FailureKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureKind::ChannelUnavailable)
    }
}

/// One delivery attempt. Appended to the ledger once its outcome is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub request_id: Uuid,
    pub attempt_number: u32,
    pub channel: ChannelKind,
    pub started_at: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

/// The ledger's record for one dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub dedup_key: String,
    pub request_id: Uuid,
    pub channel: ChannelKind,
    pub final_outcome: Outcome,
    pub attempts: Vec<DeliveryAttempt>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Why a terminal failure happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LedgerEntry {
    /// A fresh, pending entry for a request that has not been attempted yet.
    pub fn pending(request: &NotificationRequest) -> Self {
        Self {
            dedup_key: request.dedup_key.clone(),
            request_id: request.id,
            channel: request.channel.clone(),
            final_outcome: Outcome::Pending,
            attempts: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
            detail: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.final_outcome.is_terminal()
    }

    /// The number the next attempt will carry.
    pub fn next_attempt(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }
}

// =============================================================================
// Service Traits
// =============================================================================

/// Error returned by a channel adapter, already classified by the adapter.
///
/// The string carries adapter-specific detail that is stored in the ledger but
/// never inspected by the dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("policy exceeded: {0}")]
    PolicyExceeded(String),
}

impl SendError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SendError::ChannelUnavailable(_) => FailureKind::ChannelUnavailable,
            SendError::InvalidRecipient(_) => FailureKind::InvalidRecipient,
            SendError::PolicyExceeded(_) => FailureKind::PolicyExceeded,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

/// Delivers a payload to a recipient over one channel.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The channel kind this adapter is registered under.
    fn kind(&self) -> ChannelKind;

    /// Sends a payload to the recipient.
    ///
    /// # Returns
    /// * `Ok(())` once the channel accepted the message
    /// * `Err(SendError)` classified as transient or permanent by the adapter
    async fn send(&self, recipient: &str, payload: &str) -> Result<(), SendError>;
}
