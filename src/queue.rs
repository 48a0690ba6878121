//! Bounded two-lane queue between producers and dispatcher workers.
//!
//! Critical requests live in their own lane and are always handed out before
//! normal ones. Within a lane the order is FIFO. When the queue is full a
//! normal request is refused, while a critical request displaces the oldest
//! normal one.

use crate::core::{NotificationRequest, Priority};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A unit of work for the dispatcher: a request plus its retry state.
#[derive(Debug, Clone)]
pub struct Job {
    pub request: Arc<NotificationRequest>,
    /// The number the next delivery attempt will carry, starting at 1.
    pub attempt: u32,
    /// Cancelling this token stops any further attempts for the request.
    pub context: CancellationToken,
}

impl Job {
    pub fn new(request: Arc<NotificationRequest>, context: CancellationToken) -> Self {
        Self {
            request,
            attempt: 1,
            context,
        }
    }

    pub fn resume(
        request: Arc<NotificationRequest>,
        attempt: u32,
        context: CancellationToken,
    ) -> Self {
        Self {
            request,
            attempt,
            context,
        }
    }

    pub fn dedup_key(&self) -> &str {
        &self.request.dedup_key
    }

    pub fn priority(&self) -> Priority {
        self.request.priority
    }

    /// The same job, advanced to its next attempt.
    pub fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("notification queue is full (capacity {0})")]
    Full(usize),

    #[error("notification queue is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Lanes {
    critical: VecDeque<Job>,
    normal: VecDeque<Job>,
    closed: bool,
    /// Retries waiting on their backoff timer.
    delayed: usize,
}

impl Lanes {
    fn len(&self) -> usize {
        self.critical.len() + self.normal.len()
    }

    fn push(&mut self, job: Job) {
        match job.priority() {
            Priority::Critical => self.critical.push_back(job),
            Priority::Normal => self.normal.push_back(job),
        }
    }

    fn pop(&mut self) -> Option<Job> {
        self.critical.pop_front().or_else(|| self.normal.pop_front())
    }

    fn drained(&self) -> bool {
        self.closed && self.delayed == 0 && self.len() == 0
    }
}

/// The notification queue. Shared between producers and workers via `Arc`.
#[derive(Debug)]
pub struct NotificationQueue {
    capacity: usize,
    lanes: Mutex<Lanes>,
    available: Notify,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lanes: Mutex::new(Lanes::default()),
            available: Notify::new(),
        }
    }

    fn lanes(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admits a new job.
    ///
    /// # Returns
    /// * `Ok(None)` if the job was queued without side effects
    /// * `Ok(Some(job))` if a critical job displaced the returned normal job
    /// * `Err(QueueError::Full)` if there is no room and nothing to displace
    /// * `Err(QueueError::Closed)` once the queue has been closed
    pub fn enqueue(&self, job: Job) -> Result<Option<Job>, QueueError> {
        let mut lanes = self.lanes();
        if lanes.closed {
            return Err(QueueError::Closed);
        }

        let mut displaced = None;
        if lanes.len() >= self.capacity {
            match job.priority() {
                Priority::Normal => {
                    metrics::counter!("notifications_rejected_total", "reason" => "queue_full")
                        .increment(1);
                    return Err(QueueError::Full(self.capacity));
                }
                Priority::Critical => match lanes.normal.pop_front() {
                    Some(evicted) => {
                        debug!(
                            dedup_key = %evicted.dedup_key(),
                            by = %job.dedup_key(),
                            "Queue full, displacing oldest normal-priority request"
                        );
                        metrics::counter!("queue_evictions_total").increment(1);
                        displaced = Some(evicted);
                    }
                    None => {
                        metrics::counter!("notifications_rejected_total", "reason" => "queue_full")
                            .increment(1);
                        return Err(QueueError::Full(self.capacity));
                    }
                },
            }
        }

        trace!(
            dedup_key = %job.dedup_key(),
            priority = job.priority().as_str(),
            "Enqueued request"
        );
        lanes.push(job);
        metrics::gauge!("queue_depth").set(lanes.len() as f64);
        drop(lanes);
        self.available.notify_one();
        Ok(displaced)
    }

    /// Puts recovered work back into its lane, ignoring the capacity bound.
    pub fn restore(&self, job: Job) {
        let mut lanes = self.lanes();
        lanes.push(job);
        metrics::gauge!("queue_depth").set(lanes.len() as f64);
        drop(lanes);
        self.available.notify_one();
    }

    /// Re-enters a job after `delay` on a timer task.
    ///
    /// Re-entries ignore the capacity bound and are accepted after close; a
    /// closed queue only reports end-of-stream once every pending re-entry has
    /// landed. Cancelling the job's context cuts the delay short so the
    /// dispatcher can finalize it.
    pub fn requeue_after(self: &Arc<Self>, job: Job, delay: Duration) {
        self.lanes().delayed += 1;

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = job.context.cancelled() => {
                    debug!(
                        dedup_key = %job.dedup_key(),
                        "Pending retry cancelled, releasing early"
                    );
                }
            }
            queue.land(job);
        });
    }

    fn land(&self, job: Job) {
        let mut lanes = self.lanes();
        lanes.delayed -= 1;
        lanes.push(job);
        metrics::gauge!("queue_depth").set(lanes.len() as f64);
        let closed = lanes.closed;
        drop(lanes);
        self.available.notify_one();
        if closed {
            self.available.notify_waiters();
        }
    }

    /// Waits for the next job.
    ///
    /// Returns `None` once the queue is closed and fully drained, including
    /// retries still waiting on their timers.
    pub async fn dequeue(&self) -> Option<Job> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut lanes = self.lanes();
                if let Some(job) = lanes.pop() {
                    metrics::gauge!("queue_depth").set(lanes.len() as f64);
                    return Some(job);
                }
                if lanes.drained() {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stops admitting new requests and wakes every waiting consumer.
    pub fn close(&self) {
        let mut lanes = self.lanes();
        if !lanes.closed {
            debug!(queued = lanes.len(), delayed = lanes.delayed, "Closing notification queue");
        }
        lanes.closed = true;
        drop(lanes);
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lanes().closed
    }

    /// Requests currently queued, excluding retries waiting on a timer.
    pub fn len(&self) -> usize {
        self.lanes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retries currently waiting on their backoff timer.
    pub fn delayed(&self) -> usize {
        self.lanes().delayed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
