//! Cancellation, graceful shutdown and journal recovery.

#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::adapters::{GatedAdapter, ScriptedAdapter};
use helpers::app::{request, spawn_app, test_config};
use helpers::wait_until;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use telenotify::{
    core::{ChannelKind, Outcome, Priority, SendError},
    ledger::Ledger,
    SubmitError,
};
use tempfile::tempdir;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const LIMIT: Duration = Duration::from_secs(5);

fn unavailable() -> SendError {
    SendError::ChannelUnavailable("503 from gateway".into())
}

#[tokio::test]
async fn test_cancel_stops_pending_retry() {
    // Arrange: the first retry would only fire after a minute.
    let adapter = Arc::new(ScriptedAdapter::always(ChannelKind::sms(), Err(unavailable())));
    let mut config = test_config();
    config.dispatch.backoff_base_ms = 60_000;
    config.dispatch.backoff_cap_ms = 60_000;
    let app = spawn_app(config, vec![adapter.clone()]).await;
    let notifier = app.notifier();
    notifier
        .submit(request("reminder-1", ChannelKind::sms(), Priority::Normal))
        .await
        .unwrap();
    let calls = adapter.clone();
    wait_until(LIMIT, move || calls.calls() == 1).await;

    // Act
    notifier.cancel("reminder-1").await.unwrap();
    let entry = timeout(LIMIT, notifier.wait_for_outcome("reminder-1"))
        .await
        .expect("cancellation should settle the entry promptly")
        .unwrap();

    // Assert
    assert_eq!(entry.final_outcome, Outcome::PermanentFailure);
    assert_eq!(entry.detail.as_deref(), Some("cancelled"));
    assert_eq!(entry.attempts.len(), 1);
    assert_eq!(adapter.calls(), 1);

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_unknown_key() {
    let app = spawn_app(test_config(), vec![]).await;
    assert!(app.notifier().cancel("missing").await.is_err());
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_drains_queue_then_refuses_submissions() {
    let adapter = Arc::new(
        ScriptedAdapter::new(ChannelKind::email(), vec![]).with_delay(Duration::from_millis(20)),
    );
    let app = spawn_app(test_config(), vec![adapter.clone()]).await;
    let notifier = app.notifier();
    for i in 0..5 {
        notifier
            .submit(request(&format!("alert-{i}"), ChannelKind::email(), Priority::Critical))
            .await
            .unwrap();
    }

    timeout(LIMIT, app.shutdown()).await.unwrap().unwrap();

    assert_eq!(adapter.calls(), 5);
    for i in 0..5 {
        let entry = notifier.status(&format!("alert-{i}")).await.unwrap();
        assert_eq!(entry.final_outcome, Outcome::Success);
    }
    let err = notifier
        .submit(request("late", ChannelKind::email(), Priority::Critical))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::Closed));
}

#[tokio::test]
async fn test_shutdown_cancels_retries_after_grace() {
    let adapter = Arc::new(ScriptedAdapter::always(ChannelKind::push(), Err(unavailable())));
    let mut config = test_config();
    config.dispatch.backoff_base_ms = 60_000;
    config.dispatch.backoff_cap_ms = 60_000;
    config.dispatch.shutdown_grace_seconds = 0;
    let app = spawn_app(config, vec![adapter.clone()]).await;
    let notifier = app.notifier();
    notifier
        .submit(request("push-1", ChannelKind::push(), Priority::Normal))
        .await
        .unwrap();
    let calls = adapter.clone();
    wait_until(LIMIT, move || calls.calls() == 1).await;

    timeout(LIMIT, app.shutdown()).await.unwrap().unwrap();

    let entry = notifier.status("push-1").await.unwrap();
    assert_eq!(entry.final_outcome, Outcome::PermanentFailure);
    assert_eq!(entry.detail.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn test_unfinished_work_resumes_from_journal() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("ledger.jsonl");

    // A previous run admitted two requests and finished only one.
    {
        let (ledger, recovered) = Ledger::open(&journal, CancellationToken::new())
            .await
            .unwrap();
        assert!(recovered.is_empty());
        let done = request("done", ChannelKind::email(), Priority::Normal);
        let open = request("open", ChannelKind::email(), Priority::Critical);
        ledger.insert_if_absent(&done).await.unwrap();
        ledger.insert_if_absent(&open).await.unwrap();
        ledger
            .finalize("done", Outcome::Success, None)
            .await
            .unwrap();
    }

    let adapter = Arc::new(GatedAdapter::new(ChannelKind::email()));
    adapter.release(10);
    let mut config = test_config();
    config.ledger.journal_path = Some(journal.clone());
    let app = spawn_app(config, vec![adapter.clone()]).await;
    assert_eq!(app.recovered(), 1);

    let notifier = app.notifier();
    let entry = notifier.wait_for_outcome("open").await.unwrap();
    assert_eq!(entry.final_outcome, Outcome::Success);
    assert_eq!(entry.attempts.len(), 1);
    assert_eq!(adapter.started(), vec!["open"]);

    // The finished entry was not delivered again.
    assert_eq!(notifier.status("done").await.unwrap().attempts.len(), 0);
    app.shutdown().await.unwrap();

    // And the outcome survives another restart.
    let (ledger, recovered) = Ledger::open(&journal, CancellationToken::new())
        .await
        .unwrap();
    assert!(recovered.is_empty());
    assert_eq!(ledger.get("open").await.unwrap().final_outcome, Outcome::Success);
}

#[tokio::test]
async fn test_delivery_after_torn_journal_tail_survives_restart() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("ledger.jsonl");

    // A previous run admitted a request and crashed halfway through a write.
    {
        let (ledger, _) = Ledger::open(&journal, CancellationToken::new())
            .await
            .unwrap();
        ledger
            .insert_if_absent(&request("open", ChannelKind::email(), Priority::Normal))
            .await
            .unwrap();
    }
    let mut file = OpenOptions::new().append(true).open(&journal).unwrap();
    write!(file, "{{\"op\":\"attempt\",\"dedup_k").unwrap();
    drop(file);

    let adapter = Arc::new(GatedAdapter::new(ChannelKind::email()));
    adapter.release(10);
    let mut config = test_config();
    config.ledger.journal_path = Some(journal.clone());
    let app = spawn_app(config, vec![adapter.clone()]).await;
    assert_eq!(app.recovered(), 1);
    let entry = timeout(LIMIT, app.notifier().wait_for_outcome("open"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.final_outcome, Outcome::Success);
    app.shutdown().await.unwrap();

    // Two more restarts see the delivery as done and nothing to resume.
    for _ in 0..2 {
        let (ledger, recovered) = Ledger::open(&journal, CancellationToken::new())
            .await
            .unwrap();
        assert!(recovered.is_empty());
        let entry = ledger.get("open").await.unwrap();
        assert_eq!(entry.final_outcome, Outcome::Success);
        assert_eq!(entry.attempts.len(), 1);
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_journal_write_failure_does_not_leave_entry_pending() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("ledger.jsonl");
    let adapter = Arc::new(GatedAdapter::new(ChannelKind::email()));
    let mut config = test_config();
    config.ledger.journal_path = Some(journal.clone());
    let app = spawn_app(config, vec![adapter.clone()]).await;
    let notifier = app.notifier();
    notifier
        .submit(request("disk-full", ChannelKind::email(), Priority::Critical))
        .await
        .unwrap();
    let started = adapter.clone();
    wait_until(LIMIT, move || started.started().len() == 1).await;

    // The disk fills up while the send is in flight.
    let full = OpenOptions::new().write(true).open("/dev/full").unwrap();
    app.ledger().replace_journal_file(full);
    adapter.release(1);

    let entry = timeout(LIMIT, notifier.wait_for_outcome("disk-full"))
        .await
        .expect("a ledger error should still settle the entry")
        .unwrap();
    assert_eq!(entry.final_outcome, Outcome::PermanentFailure);
    assert!(entry.detail.unwrap().starts_with("ledger error:"));
    timeout(LIMIT, app.shutdown()).await.unwrap().unwrap();

    // The journal never saw the outcome, so a restart resumes the delivery.
    let (_ledger, recovered) = Ledger::open(&journal, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].dedup_key(), "disk-full");
}
