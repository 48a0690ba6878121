//! Email, SMS and push channel adapters.
//!
//! Each adapter validates the recipient and payload for its channel, then hands
//! the message to its provider webhook. Without a configured webhook the
//! delivery is only logged, which keeps local runs and demos self-contained.

use crate::core::{ChannelAdapter, ChannelKind, SendError};
use crate::notification::webhook::WebhookTransport;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

/// Longest SMS body accepted: ten concatenated segments.
pub const SMS_MAX_CHARS: usize = 1600;
/// Provider limit for a push notification body.
pub const PUSH_MAX_BYTES: usize = 4096;
const PUSH_TOKEN_MAX_LEN: usize = 4096;
const EMAIL_SUBJECT: &str = "Telehealth notification";

async fn deliver(
    transport: Option<&WebhookTransport>,
    kind: &str,
    recipient: &str,
    payload: &str,
    body: Value,
) -> Result<(), SendError> {
    match transport {
        Some(transport) => transport.post(&body).await,
        None => {
            info!(channel = kind, recipient, "Sending {} to {}: {}", kind, recipient, payload);
            Ok(())
        }
    }
}

/// Delivers notifications by email.
#[derive(Debug, Clone, Default)]
pub struct EmailAdapter {
    transport: Option<WebhookTransport>,
}

impl EmailAdapter {
    pub fn new(transport: Option<WebhookTransport>) -> Self {
        Self { transport }
    }

    /// Checks for a plausible `local@domain.tld` address.
    pub fn validate_recipient(address: &str) -> Result<(), SendError> {
        let invalid =
            || SendError::InvalidRecipient(format!("{:?} is not an email address", address));
        if address.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        let (local, domain) = address.split_once('@').ok_or_else(invalid)?;
        let domain_ok = domain.contains('.')
            && !domain.contains('@')
            && !domain.starts_with('.')
            && !domain.ends_with('.');
        if local.is_empty() || !domain_ok {
            return Err(invalid());
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::email()
    }

    async fn send(&self, recipient: &str, payload: &str) -> Result<(), SendError> {
        Self::validate_recipient(recipient)?;
        let body = json!({ "to": recipient, "subject": EMAIL_SUBJECT, "body": payload });
        deliver(self.transport.as_ref(), "email", recipient, payload, body).await
    }
}

/// Delivers notifications by SMS.
#[derive(Debug, Clone, Default)]
pub struct SmsAdapter {
    transport: Option<WebhookTransport>,
}

impl SmsAdapter {
    pub fn new(transport: Option<WebhookTransport>) -> Self {
        Self { transport }
    }

    /// Accepts E.164 numbers: a leading `+` followed by 8 to 15 digits.
    pub fn validate_recipient(number: &str) -> Result<(), SendError> {
        let digits = number.strip_prefix('+').unwrap_or("");
        if !(8..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(SendError::InvalidRecipient(format!(
                "{:?} is not an E.164 phone number",
                number
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::sms()
    }

    async fn send(&self, recipient: &str, payload: &str) -> Result<(), SendError> {
        Self::validate_recipient(recipient)?;
        let length = payload.chars().count();
        if length > SMS_MAX_CHARS {
            return Err(SendError::PolicyExceeded(format!(
                "SMS body is {} characters, limit is {}",
                length, SMS_MAX_CHARS
            )));
        }
        let body = json!({ "to": recipient, "message": payload });
        deliver(self.transport.as_ref(), "SMS", recipient, payload, body).await
    }
}

/// Delivers notifications to a device push token.
#[derive(Debug, Clone, Default)]
pub struct PushAdapter {
    transport: Option<WebhookTransport>,
}

impl PushAdapter {
    pub fn new(transport: Option<WebhookTransport>) -> Self {
        Self { transport }
    }

    pub fn validate_recipient(token: &str) -> Result<(), SendError> {
        let valid_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_' | '.');
        if token.is_empty() || token.len() > PUSH_TOKEN_MAX_LEN || !token.chars().all(valid_char) {
            return Err(SendError::InvalidRecipient(format!(
                "{:?} is not a device token",
                token
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for PushAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::push()
    }

    async fn send(&self, recipient: &str, payload: &str) -> Result<(), SendError> {
        Self::validate_recipient(recipient)?;
        if payload.len() > PUSH_MAX_BYTES {
            return Err(SendError::PolicyExceeded(format!(
                "push body is {} bytes, limit is {}",
                payload.len(),
                PUSH_MAX_BYTES
            )));
        }
        let body = json!({ "token": recipient, "title": EMAIL_SUBJECT, "body": payload });
        deliver(self.transport.as_ref(), "push notification", recipient, payload, body).await
    }
}
