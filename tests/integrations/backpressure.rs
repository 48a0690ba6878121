//! Priority ordering, capacity limits and eviction on a busy worker.

#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::adapters::GatedAdapter;
use helpers::app::{request, spawn_app, test_config};
use helpers::wait_until;
use std::sync::Arc;
use std::time::Duration;
use telenotify::{
    core::{ChannelKind, Outcome, Priority},
    SubmitError,
};

const LIMIT: Duration = Duration::from_secs(5);

/// One worker, parked on the first request so later ones stay queued.
async fn parked_app(capacity: usize) -> (telenotify::App, Arc<GatedAdapter>) {
    let adapter = Arc::new(GatedAdapter::new(ChannelKind::email()));
    let mut config = test_config();
    config.queue.max_capacity = capacity;
    config.dispatch.worker_count = 1;
    let app = spawn_app(config, vec![adapter.clone()]).await;

    app.notifier()
        .submit(request("blocker", ChannelKind::email(), Priority::Normal))
        .await
        .unwrap();
    let gate = adapter.clone();
    wait_until(LIMIT, move || gate.started().len() == 1).await;
    (app, adapter)
}

#[tokio::test]
async fn test_critical_requests_are_delivered_first() {
    let (app, adapter) = parked_app(16).await;
    let notifier = app.notifier();

    for (key, priority) in [
        ("normal-1", Priority::Normal),
        ("normal-2", Priority::Normal),
        ("critical-1", Priority::Critical),
        ("critical-2", Priority::Critical),
    ] {
        notifier
            .submit(request(key, ChannelKind::email(), priority))
            .await
            .unwrap();
    }

    adapter.release(5);
    notifier.wait_for_outcome("normal-2").await.unwrap();

    assert_eq!(
        adapter.started(),
        vec!["blocker", "critical-1", "critical-2", "normal-1", "normal-2"]
    );
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_full_queue_refuses_normal_and_evicts_for_critical() {
    let (app, adapter) = parked_app(2).await;
    let notifier = app.notifier();

    notifier
        .submit(request("normal-1", ChannelKind::email(), Priority::Normal))
        .await
        .unwrap();
    notifier
        .submit(request("normal-2", ChannelKind::email(), Priority::Normal))
        .await
        .unwrap();

    // A normal request on a full queue is refused and leaves no trace.
    let err = notifier
        .submit(request("normal-3", ChannelKind::email(), Priority::Normal))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::QueueFull(2)));
    assert!(notifier.status("normal-3").await.is_err());

    // A critical request displaces the oldest normal one.
    notifier
        .submit(request("critical-1", ChannelKind::email(), Priority::Critical))
        .await
        .unwrap();
    let evicted = notifier.status("normal-1").await.unwrap();
    assert_eq!(evicted.final_outcome, Outcome::PermanentFailure);
    assert!(evicted.attempts.is_empty());
    assert!(evicted.detail.unwrap().starts_with("evicted"));

    notifier
        .submit(request("critical-2", ChannelKind::email(), Priority::Critical))
        .await
        .unwrap();
    assert_eq!(
        notifier.status("normal-2").await.unwrap().final_outcome,
        Outcome::PermanentFailure
    );

    // Nothing left to displace.
    let err = notifier
        .submit(request("critical-3", ChannelKind::email(), Priority::Critical))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::QueueFull(2)));

    adapter.release(3);
    for key in ["blocker", "critical-1", "critical-2"] {
        let entry = notifier.wait_for_outcome(key).await.unwrap();
        assert_eq!(entry.final_outcome, Outcome::Success);
    }
    assert_eq!(adapter.started(), vec!["blocker", "critical-1", "critical-2"]);

    app.shutdown().await.unwrap();
}
