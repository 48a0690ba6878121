//! # Metrics Server
//!
//! An `axum` server with a single `/metrics` endpoint that renders the
//! Prometheus exposition format. It stops when its cancellation token fires.

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

pub struct MetricsServer {
    listener: TcpListener,
    prom_handle: PrometheusHandle,
    shutdown: CancellationToken,
}

impl MetricsServer {
    /// Creates a new `MetricsServer` but does not spawn it.
    pub fn new(
        listener: TcpListener,
        prom_handle: PrometheusHandle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            listener,
            prom_handle,
            shutdown,
        }
    }

    /// Returns a future that serves scrapes until shutdown.
    pub fn run(self) -> impl Future<Output = ()> {
        let prom_handle = self.prom_handle;
        let app = Router::new().route(
            "/metrics",
            get(move || {
                let prom_handle = prom_handle.clone();
                async move { prom_handle.render() }
            }),
        );
        let shutdown = self.shutdown;
        let listener = self.listener;

        async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                error!("Metrics server error: {}", e);
            }
            trace!("Metrics server task finished.");
        }
    }
}
