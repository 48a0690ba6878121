//! # Internal Metrics Module
//!
//! Components record through the `metrics` facade macros directly. This
//! module registers descriptions for every metric the service emits and, when
//! enabled, installs the Prometheus recorder and its scrape endpoint.
//!
//! - **`MetricsBuilder`**: installs the recorder and binds the listener.
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum`-based web server
//!   that exposes the `/metrics` endpoint for Prometheus to scrape.

use crate::config::MetricsConfig;
use crate::internal_metrics::server::MetricsServer;
use anyhow::{Context, Result};
use metrics::Unit;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod server;

/// Registers descriptions for all metrics with the global recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "notifications_submitted_total",
        Unit::Count,
        "Notifications accepted for delivery, labeled by channel and priority."
    );
    metrics::describe_counter!(
        "notifications_deduplicated_total",
        Unit::Count,
        "Submissions answered from an existing ledger entry."
    );
    metrics::describe_counter!(
        "notifications_rejected_total",
        Unit::Count,
        "Submissions refused, labeled by reason."
    );
    metrics::describe_counter!(
        "queue_evictions_total",
        Unit::Count,
        "Normal-priority jobs displaced by critical jobs on a full queue."
    );
    metrics::describe_gauge!("queue_depth", Unit::Count, "Jobs waiting for a delivery worker.");
    metrics::describe_counter!(
        "delivery_attempts_total",
        Unit::Count,
        "Delivery attempts, labeled by channel and outcome."
    );
    metrics::describe_histogram!(
        "delivery_duration_seconds",
        Unit::Seconds,
        "Latency of a single adapter send."
    );
    metrics::describe_counter!(
        "retries_scheduled_total",
        Unit::Count,
        "Transient failures scheduled for another attempt."
    );
    metrics::describe_counter!(
        "notifications_finalized_total",
        Unit::Count,
        "Ledger entries that reached a terminal outcome, labeled by outcome."
    );
}

/// Builder for the metrics system.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Installs the Prometheus recorder and binds the scrape listener.
    ///
    /// Returns `None` when metrics are disabled. Descriptions are registered
    /// either way.
    pub async fn build(
        self,
        shutdown: CancellationToken,
    ) -> Result<Option<(MetricsServer, SocketAddr)>> {
        if !self.config.enabled {
            describe_metrics();
            return Ok(None);
        }

        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )?
            .build_recorder();
        let handle = recorder.handle();

        let listener = TcpListener::bind(self.config.listen_address)
            .await
            .with_context(|| {
                format!("failed to bind metrics server to {}", self.config.listen_address)
            })?;
        let addr = listener.local_addr()?;

        metrics::set_global_recorder(recorder)
            .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))?;
        describe_metrics();
        info!(%addr, "Prometheus metrics endpoint listening");

        Ok(Some((MetricsServer::new(listener, handle, shutdown), addr)))
    }
}
