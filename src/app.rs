//! The main application logic, decoupled from the entry point.

use crate::{
    config::Config,
    core::{ChannelAdapter, ChannelKind, LedgerEntry, NotificationRequest, Outcome},
    dispatch::{Dispatcher, RetryPolicy},
    internal_metrics::MetricsBuilder,
    ledger::{Ledger, LedgerError},
    notification::AdapterRegistry,
    queue::{Job, NotificationQueue, QueueError},
    task_manager::TaskManager,
};
use anyhow::Result;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const EVICTED: &str = "evicted: displaced by a critical request on a full queue";

/// Why a submission was refused.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("notification queue is full (capacity {0})")]
    QueueFull(usize),

    #[error("notifier is shutting down")]
    Closed,

    #[error("no adapter registered for channel {0}")]
    UnknownChannel(ChannelKind),

    #[error("payload is {size} bytes, limit is {limit}")]
    PolicyExceeded { size: usize, limit: usize },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no notification with dedup key {0:?}")]
pub struct NotFound(pub String);

/// The producer-facing handle. Cheap to clone.
#[derive(Clone)]
pub struct Notifier {
    ledger: Arc<Ledger>,
    queue: Arc<NotificationQueue>,
    adapters: Arc<AdapterRegistry>,
    max_payload_bytes: usize,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("queued", &self.queue.len())
            .field("max_payload_bytes", &self.max_payload_bytes)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    /// Admits a request for delivery.
    ///
    /// Returns the entry as admitted, or the existing entry when the dedup
    /// key is already known. Nothing is recorded when the request is refused.
    #[instrument(skip_all, fields(dedup_key = %request.dedup_key, channel = %request.channel))]
    pub async fn submit(&self, request: NotificationRequest) -> Result<LedgerEntry, SubmitError> {
        if !self.adapters.contains(&request.channel) {
            metrics::counter!("notifications_rejected_total", "reason" => "unknown_channel")
                .increment(1);
            return Err(SubmitError::UnknownChannel(request.channel));
        }
        if request.payload.len() > self.max_payload_bytes {
            metrics::counter!("notifications_rejected_total", "reason" => "policy_exceeded")
                .increment(1);
            return Err(SubmitError::PolicyExceeded {
                size: request.payload.len(),
                limit: self.max_payload_bytes,
            });
        }
        if self.queue.is_closed() {
            return Err(SubmitError::Closed);
        }

        let insertion = self.ledger.insert_if_absent(&request).await?;
        if !insertion.created {
            debug!("Duplicate submission, returning existing entry");
            metrics::counter!("notifications_deduplicated_total").increment(1);
            return Ok(insertion.entry);
        }

        let key = request.dedup_key.clone();
        let context = self
            .ledger
            .context(&key)
            .await
            .ok_or_else(|| LedgerError::UnknownKey(key.clone()))?;
        let channel = request.channel.to_string();
        let priority = request.priority;

        match self.queue.enqueue(Job::new(Arc::new(request), context)) {
            Ok(displaced) => {
                metrics::counter!(
                    "notifications_submitted_total",
                    "channel" => channel,
                    "priority" => priority.as_str()
                )
                .increment(1);
                if let Some(evicted) = displaced {
                    warn!(evicted = %evicted.dedup_key(), "Evicted normal-priority request");
                    self.ledger
                        .finalize(
                            evicted.dedup_key(),
                            Outcome::PermanentFailure,
                            Some(EVICTED.to_string()),
                        )
                        .await?;
                }
                Ok(insertion.entry)
            }
            Err(e) => {
                if let Err(rollback) = self.ledger.remove(&key).await {
                    error!(error = %rollback, "Failed to roll back refused submission");
                }
                Err(match e {
                    QueueError::Full(capacity) => SubmitError::QueueFull(capacity),
                    QueueError::Closed => SubmitError::Closed,
                })
            }
        }
    }

    /// The current ledger entry for `dedup_key`.
    pub async fn status(&self, dedup_key: &str) -> Result<LedgerEntry, NotFound> {
        self.ledger
            .get(dedup_key)
            .await
            .ok_or_else(|| NotFound(dedup_key.to_string()))
    }

    /// Cancels any further attempts for the request.
    ///
    /// A queued or retrying request finalizes as a permanent failure with the
    /// detail "cancelled". An attempt already in progress runs to completion.
    pub async fn cancel(&self, dedup_key: &str) -> Result<LedgerEntry, NotFound> {
        let context = self
            .ledger
            .context(dedup_key)
            .await
            .ok_or_else(|| NotFound(dedup_key.to_string()))?;
        context.cancel();
        info!(dedup_key, "Cancellation requested");
        self.status(dedup_key).await
    }

    /// Waits until the entry for `dedup_key` reaches a terminal outcome.
    pub async fn wait_for_outcome(&self, dedup_key: &str) -> Result<LedgerEntry, NotFound> {
        let not_found = || NotFound(dedup_key.to_string());
        let mut updates = self.ledger.subscribe(dedup_key).await.ok_or_else(not_found)?;
        let entry = updates
            .wait_for(|entry| entry.is_terminal())
            .await
            .map_err(|_| not_found())?
            .clone();
        Ok(entry)
    }
}

/// A handle to the running application.
pub struct App {
    notifier: Notifier,
    dispatcher: Arc<Dispatcher>,
    ledger: Arc<Ledger>,
    queue: Arc<NotificationQueue>,
    task_manager: TaskManager,
    server_shutdown: CancellationToken,
    metrics_addr: Option<SocketAddr>,
    recovered: usize,
    grace: Duration,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// The dispatcher shared by the workers, for inline delivery.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn ledger(&self) -> Arc<Ledger> {
        self.ledger.clone()
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Unfinished deliveries recovered from the journal at startup.
    pub fn recovered(&self) -> usize {
        self.recovered
    }

    /// Stops accepting submissions, lets the workers drain the queue and
    /// cancels whatever is still outstanding once the grace period ends.
    pub async fn shutdown(self) -> Result<()> {
        info!(
            queued = self.queue.len(),
            delayed = self.queue.delayed(),
            "Shutting down notifier"
        );
        self.queue.close();
        self.server_shutdown.cancel();
        self.task_manager.shutdown(self.grace).await;
        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Allows overriding the channel adapters for testing.
pub struct AppBuilder {
    config: Config,
    adapters_override: Option<AdapterRegistry>,
    extra_adapters: Vec<Arc<dyn ChannelAdapter>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            adapters_override: None,
            extra_adapters: Vec::new(),
        }
    }

    /// Replaces the configured adapters entirely.
    pub fn adapters_override(mut self, registry: AdapterRegistry) -> Self {
        self.adapters_override = Some(registry);
        self
    }

    /// Registers an adapter on top of the configured ones, replacing any
    /// adapter of the same kind.
    pub fn adapter(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.extra_adapters.push(adapter);
        self
    }

    /// Builds all components and starts the worker pool.
    #[instrument(skip_all)]
    pub async fn build(self) -> Result<App> {
        let config = self.config;
        config.validate()?;

        let root = CancellationToken::new();
        let task_manager = TaskManager::new(root.clone());

        // =========================================================================
        // 1. Metrics
        // =========================================================================
        let server_shutdown = CancellationToken::new();
        let metrics_addr = match MetricsBuilder::new(config.metrics.clone())
            .build(server_shutdown.clone())
            .await?
        {
            Some((server, addr)) => {
                task_manager.spawn("MetricsServer", server.run());
                Some(addr)
            }
            None => None,
        };

        // =========================================================================
        // 2. Ledger, adapters and queue
        // =========================================================================
        let (ledger, recovered) = match &config.ledger.journal_path {
            Some(path) => {
                debug!(path = %path.display(), "Opening ledger journal");
                Ledger::open(path, root.clone()).await?
            }
            None => (Ledger::in_memory(root.clone()), Vec::new()),
        };
        let ledger = Arc::new(ledger);

        let mut adapters = match self.adapters_override {
            Some(registry) => registry,
            None => AdapterRegistry::from_config(&config.channels)?,
        };
        for adapter in self.extra_adapters {
            adapters.register(adapter);
        }
        if adapters.is_empty() {
            warn!("No channel adapters registered; every submission will be refused");
        }
        let adapters = Arc::new(adapters);

        let queue = Arc::new(NotificationQueue::new(config.queue.max_capacity));
        let recovered_count = recovered.len();
        for job in recovered {
            queue.restore(job);
        }

        let dispatcher = Arc::new(Dispatcher::new(
            ledger.clone(),
            adapters.clone(),
            queue.clone(),
            RetryPolicy::from_config(&config.dispatch),
        ));

        // =========================================================================
        // 3. Worker pool
        // =========================================================================
        info!("Spawning {} delivery workers...", config.dispatch.worker_count);
        for i in 0..config.dispatch.worker_count {
            let queue = queue.clone();
            let dispatcher = dispatcher.clone();
            task_manager.spawn("DeliveryWorker", async move {
                debug!(worker = i, "Delivery worker started");
                while let Some(job) = queue.dequeue().await {
                    let key = job.dedup_key().to_string();
                    match dispatcher.process(job).await {
                        Ok(Some(entry)) => debug!(
                            worker = i,
                            dedup_key = %key,
                            outcome = entry.final_outcome.as_str(),
                            "Delivery settled"
                        ),
                        Ok(None) => {}
                        Err(e) => error!(
                            worker = i,
                            dedup_key = %key,
                            error = %e,
                            "Delivery abandoned after a ledger error"
                        ),
                    }
                }
                debug!(worker = i, "Queue drained, delivery worker exiting");
            });
        }

        let notifier = Notifier {
            ledger: ledger.clone(),
            queue: queue.clone(),
            adapters,
            max_payload_bytes: config.dispatch.max_payload_bytes,
        };

        Ok(App {
            notifier,
            dispatcher,
            ledger,
            queue,
            task_manager,
            server_shutdown,
            metrics_addr,
            recovered: recovered_count,
            grace: Duration::from_secs(config.dispatch.shutdown_grace_seconds),
        })
    }
}
