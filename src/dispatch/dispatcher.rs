use crate::{
    core::{ChannelAdapter, DeliveryAttempt, LedgerEntry, NotificationRequest, Outcome},
    dispatch::{DispatchError, RetryPolicy},
    ledger::{Ledger, LedgerError},
    notification::AdapterRegistry,
    queue::{Job, NotificationQueue},
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const CANCELLED: &str = "cancelled";

/// What the dispatcher decided after one step.
#[derive(Debug)]
enum Step {
    /// The entry reached its terminal state.
    Settled(LedgerEntry),
    /// A transient failure; try again after the delay.
    RetryAfter(Duration),
}

/// Sends requests through their channel adapter and tracks the outcome.
pub struct Dispatcher {
    ledger: Arc<Ledger>,
    adapters: Arc<AdapterRegistry>,
    queue: Arc<NotificationQueue>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        ledger: Arc<Ledger>,
        adapters: Arc<AdapterRegistry>,
        queue: Arc<NotificationQueue>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            adapters,
            queue,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Delivers a request inline, retrying transient failures after a timed
    /// wait.
    ///
    /// If the ledger already holds an entry for the request's dedup key, that
    /// entry is returned unchanged and nothing is sent.
    #[instrument(skip_all, fields(dedup_key = %request.dedup_key, channel = %request.channel))]
    pub async fn dispatch(
        &self,
        request: NotificationRequest,
    ) -> Result<LedgerEntry, DispatchError> {
        if !self.adapters.contains(&request.channel) {
            return Err(DispatchError::UnknownChannel(request.channel.clone()));
        }

        let insertion = self.ledger.insert_if_absent(&request).await?;
        if !insertion.created {
            debug!("Dedup key already in ledger, returning existing entry");
            return Ok(insertion.entry);
        }
        let context = self
            .ledger
            .context(&request.dedup_key)
            .await
            .ok_or_else(|| LedgerError::UnknownKey(request.dedup_key.clone()))?;

        let mut attempt = 1;
        loop {
            match self.settled_step(&request, attempt, &context).await? {
                Step::Settled(entry) => return Ok(entry),
                Step::RetryAfter(delay) => {
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = context.cancelled() => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Performs one attempt for a queued job.
    ///
    /// # Returns
    /// * `Ok(Some(entry))` once the job reached a terminal state
    /// * `Ok(None)` if the job was handed back to the queue for a retry
    #[instrument(skip_all, fields(dedup_key = %job.dedup_key(), attempt = job.attempt))]
    pub async fn process(&self, job: Job) -> Result<Option<LedgerEntry>, DispatchError> {
        match self.settled_step(&job.request, job.attempt, &job.context).await? {
            Step::Settled(entry) => Ok(Some(entry)),
            Step::RetryAfter(delay) => {
                debug!(delay_ms = delay.as_millis() as u64, "Scheduling retry");
                self.queue.requeue_after(job.next_attempt(), delay);
                Ok(None)
            }
        }
    }

    /// Runs one step. When the ledger rejects a write the entry is abandoned
    /// as a permanent failure, so it never stays pending without an owner.
    async fn settled_step(
        &self,
        request: &NotificationRequest,
        attempt_number: u32,
        context: &CancellationToken,
    ) -> Result<Step, DispatchError> {
        let result = self.step(request, attempt_number, context).await;
        if let Err(e) = &result {
            let key = &request.dedup_key;
            error!(dedup_key = %key, error = %e, "Ledger write failed, abandoning delivery");
            self.ledger.abandon(key, format!("ledger error: {}", e)).await;
        }
        result
    }

    async fn step(
        &self,
        request: &NotificationRequest,
        attempt_number: u32,
        context: &CancellationToken,
    ) -> Result<Step, DispatchError> {
        let key = &request.dedup_key;
        if context.is_cancelled() {
            info!(dedup_key = %key, "Request cancelled before attempt {}", attempt_number);
            let entry = self
                .ledger
                .finalize(key, Outcome::PermanentFailure, Some(CANCELLED.to_string()))
                .await?;
            return Ok(Step::Settled(entry));
        }

        let Some(adapter) = self.adapters.get(&request.channel) else {
            // Only reachable for work recovered under a configuration that
            // no longer registers the channel.
            warn!(dedup_key = %key, channel = %request.channel, "No adapter for recovered request");
            let detail = format!("no adapter registered for channel {}", request.channel);
            let entry = self
                .ledger
                .finalize(key, Outcome::PermanentFailure, Some(detail))
                .await?;
            return Ok(Step::Settled(entry));
        };

        let attempt = self.attempt(adapter.as_ref(), request, attempt_number).await;
        let failure = attempt.failure;
        let detail = attempt.error_detail.clone();
        self.ledger.append_attempt(key, attempt).await?;

        let step = match failure {
            None => {
                let entry = self.ledger.finalize(key, Outcome::Success, None).await?;
                Step::Settled(entry)
            }
            Some(kind) if kind.is_transient() && self.policy.allows_retry(attempt_number) => {
                metrics::counter!(
                    "retries_scheduled_total",
                    "channel" => request.channel.to_string()
                )
                .increment(1);
                Step::RetryAfter(self.policy.delay_for(attempt_number))
            }
            Some(kind) if kind.is_transient() => {
                warn!(dedup_key = %key, attempts = attempt_number, "Retries exhausted");
                let detail = format!(
                    "retries exhausted after {} attempts: {}",
                    attempt_number,
                    detail.unwrap_or_default()
                );
                let entry = self
                    .ledger
                    .finalize(key, Outcome::PermanentFailure, Some(detail))
                    .await?;
                Step::Settled(entry)
            }
            Some(_) => {
                let entry = self
                    .ledger
                    .finalize(key, Outcome::PermanentFailure, detail)
                    .await?;
                Step::Settled(entry)
            }
        };
        Ok(step)
    }

    /// Invokes the adapter once and turns the result into an attempt record.
    async fn attempt(
        &self,
        adapter: &dyn ChannelAdapter,
        request: &NotificationRequest,
        attempt_number: u32,
    ) -> DeliveryAttempt {
        let started_at = Utc::now();
        let timer = Instant::now();
        let result = adapter.send(&request.recipient_id, &request.payload).await;
        metrics::histogram!("delivery_duration_seconds", "channel" => request.channel.to_string())
            .record(timer.elapsed().as_secs_f64());

        let (outcome, failure, error_detail) = match result {
            Ok(()) => (Outcome::Success, None, None),
            Err(e) => {
                let outcome = if e.is_transient() {
                    Outcome::TransientFailure
                } else {
                    Outcome::PermanentFailure
                };
                debug!(
                    dedup_key = %request.dedup_key,
                    attempt = attempt_number,
                    error = %e,
                    "Delivery attempt failed"
                );
                (outcome, Some(e.kind()), Some(e.to_string()))
            }
        };
        metrics::counter!(
            "delivery_attempts_total",
            "channel" => request.channel.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);

        DeliveryAttempt {
            request_id: request.id,
            attempt_number,
            channel: request.channel.clone(),
            started_at,
            outcome,
            failure,
            error_detail,
        }
    }
}
