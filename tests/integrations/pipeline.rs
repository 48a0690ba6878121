//! End-to-end delivery through the queue, workers and ledger.

#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::adapters::ScriptedAdapter;
use helpers::app::{request, spawn_app, test_config};
use std::sync::Arc;
use telenotify::{
    core::{ChannelKind, FailureKind, Outcome, Priority, SendError},
    SubmitError,
};

fn unavailable() -> SendError {
    SendError::ChannelUnavailable("gateway timeout".into())
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    // Arrange
    let adapter = Arc::new(ScriptedAdapter::new(
        ChannelKind::sms(),
        vec![Err(unavailable()), Err(unavailable()), Ok(())],
    ));
    let app = spawn_app(test_config(), vec![adapter.clone()]).await;
    let notifier = app.notifier();

    // Act
    let admitted = notifier
        .submit(request("reminder-1", ChannelKind::sms(), Priority::Normal))
        .await
        .unwrap();
    let entry = notifier.wait_for_outcome("reminder-1").await.unwrap();

    // Assert
    assert_eq!(admitted.final_outcome, Outcome::Pending);
    assert_eq!(entry.final_outcome, Outcome::Success);
    assert_eq!(entry.attempts.len(), 3);
    let numbers: Vec<u32> = entry.attempts.iter().map(|a| a.attempt_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(entry.attempts[0].failure, Some(FailureKind::ChannelUnavailable));
    assert!(entry.completed_at.is_some());
    assert_eq!(adapter.calls(), 3);

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let adapter = Arc::new(ScriptedAdapter::always(
        ChannelKind::email(),
        Err(SendError::InvalidRecipient("mailbox does not exist".into())),
    ));
    let app = spawn_app(test_config(), vec![adapter.clone()]).await;
    let notifier = app.notifier();

    notifier
        .submit(request("alert-1", ChannelKind::email(), Priority::Critical))
        .await
        .unwrap();
    let entry = notifier.wait_for_outcome("alert-1").await.unwrap();

    assert_eq!(entry.final_outcome, Outcome::PermanentFailure);
    assert_eq!(entry.attempts.len(), 1);
    assert_eq!(entry.attempts[0].failure, Some(FailureKind::InvalidRecipient));
    assert_eq!(adapter.calls(), 1);

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_retries_become_permanent() {
    let adapter = Arc::new(ScriptedAdapter::always(ChannelKind::push(), Err(unavailable())));
    let mut config = test_config();
    config.dispatch.max_retries = 2;
    let app = spawn_app(config, vec![adapter.clone()]).await;
    let notifier = app.notifier();

    notifier
        .submit(request("push-1", ChannelKind::push(), Priority::Normal))
        .await
        .unwrap();
    let entry = notifier.wait_for_outcome("push-1").await.unwrap();

    assert_eq!(entry.final_outcome, Outcome::PermanentFailure);
    assert_eq!(entry.attempts.len(), 3);
    assert!(entry
        .attempts
        .iter()
        .all(|a| a.outcome == Outcome::TransientFailure));
    assert!(entry.detail.unwrap().starts_with("retries exhausted after 3 attempts"));

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_submission_refusals_leave_no_entry() {
    let adapter = Arc::new(ScriptedAdapter::new(ChannelKind::email(), vec![]));
    let mut config = test_config();
    config.dispatch.max_payload_bytes = 32;
    let app = spawn_app(config, vec![adapter]).await;
    let notifier = app.notifier();

    let err = notifier
        .submit(request("fax-1", ChannelKind::new("fax"), Priority::Normal))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::UnknownChannel(ref kind) if kind.as_str() == "fax"));

    let mut oversized = request("big-1", ChannelKind::email(), Priority::Normal);
    oversized.payload = "x".repeat(33);
    let err = notifier.submit(oversized).await.unwrap_err();
    assert!(matches!(err, SubmitError::PolicyExceeded { size: 33, limit: 32 }));

    assert!(notifier.status("fax-1").await.is_err());
    assert!(notifier.status("big-1").await.is_err());
    assert!(app.ledger().is_empty());

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_status_of_unknown_key() {
    let app = spawn_app(test_config(), vec![]).await;
    let err = app.notifier().status("nope").await.unwrap_err();
    assert_eq!(err.0, "nope");
    assert!(app.notifier().wait_for_outcome("nope").await.is_err());
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_inline_dispatch_records_attempts() {
    let adapter = Arc::new(ScriptedAdapter::new(
        ChannelKind::email(),
        vec![Err(unavailable()), Ok(())],
    ));
    let app = spawn_app(test_config(), vec![adapter]).await;

    let entry = app
        .dispatcher()
        .dispatch(request("inline-1", ChannelKind::email(), Priority::Critical))
        .await
        .unwrap();

    assert_eq!(entry.final_outcome, Outcome::Success);
    assert_eq!(entry.attempts.len(), 2);
    assert_eq!(app.notifier().status("inline-1").await.unwrap(), entry);

    app.shutdown().await.unwrap();
}
