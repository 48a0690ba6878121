//! Builders for running a full notifier in tests.

use std::sync::Arc;
use telenotify::{
    app::{App, AppBuilder},
    config::Config,
    core::{ChannelAdapter, ChannelKind, NotificationRequest, Priority},
    notification::AdapterRegistry,
};

/// A configuration with fast, deterministic retries and no metrics exporter.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.queue.max_capacity = 64;
    config.dispatch.worker_count = 2;
    config.dispatch.max_retries = 3;
    config.dispatch.backoff_base_ms = 5;
    config.dispatch.backoff_cap_ms = 50;
    config.dispatch.jitter = 0.0;
    config.dispatch.shutdown_grace_seconds = 1;
    config.metrics.enabled = false;
    config
}

/// Builds an app whose only adapters are the ones given.
pub async fn spawn_app(config: Config, adapters: Vec<Arc<dyn ChannelAdapter>>) -> App {
    let mut registry = AdapterRegistry::default();
    for adapter in adapters {
        registry.register(adapter);
    }
    AppBuilder::new(config)
        .adapters_override(registry)
        .build()
        .await
        .expect("app should build")
}

pub fn request(key: &str, channel: ChannelKind, priority: Priority) -> NotificationRequest {
    NotificationRequest::new(key, channel, format!("payload for {key}"), priority)
        .with_dedup_key(key)
}
