//! Builders for the notifications raised by the telehealth front end.
//!
//! Each builder derives a stable dedup key from the fields that identify the
//! event, so raising the same event twice lands on the same ledger entry.

use crate::core::{ChannelKind, NotificationRequest, Priority};
use chrono::{DateTime, Utc};

pub const PANIC_BUTTON_MESSAGE: &str = "Patient triggered panic button!";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn dedup_key(kind: &str, parts: &[&str]) -> String {
    let data = format!("{}::{}", kind, parts.join("::"));
    blake3::hash(data.as_bytes()).to_hex().to_string()
}

/// An alert about a patient, raised at `at`.
///
/// Only critical alerts jump the queue and may displace routine traffic.
pub fn emergency_alert(
    patient_id: &str,
    message: &str,
    recipient: &str,
    channel: ChannelKind,
    priority: Priority,
    at: DateTime<Utc>,
) -> NotificationRequest {
    let time = at.format(TIME_FORMAT).to_string();
    let payload = format!("ALERT for Patient {}: {} at {}", patient_id, message, time);
    let key = dedup_key(
        "ALERT",
        &[patient_id, message, recipient, channel.as_str(), &time],
    );
    NotificationRequest::new(recipient, channel, payload, priority).with_dedup_key(key)
}

/// The alert raised when a patient presses the panic button.
///
/// Presses within the same minute collapse into one notification.
pub fn panic_button(
    patient_id: &str,
    recipient: &str,
    channel: ChannelKind,
    at: DateTime<Utc>,
) -> NotificationRequest {
    let minute = at.format("%Y-%m-%dT%H:%M").to_string();
    let key = dedup_key("PANIC", &[patient_id, recipient, channel.as_str(), &minute]);
    emergency_alert(
        patient_id,
        PANIC_BUTTON_MESSAGE,
        recipient,
        channel,
        Priority::Critical,
        at,
    )
    .with_dedup_key(key)
}

/// A routine reminder, such as a medication or appointment reminder.
pub fn reminder(
    recipient: &str,
    message: &str,
    due_at: &str,
    channel: ChannelKind,
) -> NotificationRequest {
    let payload = format!("REMINDER: {} at {}", message, due_at);
    let key = dedup_key("REMINDER", &[recipient, message, due_at, channel.as_str()]);
    NotificationRequest::new(recipient, channel, payload, Priority::Normal).with_dedup_key(key)
}
