//! The delivery ledger: one entry per dedup key, holding every attempt.
//!
//! Entries live in a `moka` cache, whose atomic `entry().or_insert_with()`
//! guarantees that concurrent inserts for one key produce exactly one winner
//! without serializing unrelated keys. Each entry sits in its own `watch`
//! channel, which gives per-key mutual exclusion for updates and lets callers
//! wait for the final outcome.

pub mod journal;

use crate::core::{DeliveryAttempt, LedgerEntry, NotificationRequest, Outcome};
use crate::queue::Job;
use chrono::Utc;
use journal::{Journal, JournalError, JournalRecord};
use moka::future::Cache;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("no ledger entry for dedup key {0:?}")]
    UnknownKey(String),

    #[error("ledger entry {0:?} is already final")]
    AlreadyFinal(String),

    #[error("ledger entry {0:?} has delivery history and cannot be removed")]
    NotRemovable(String),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Result of [`Ledger::insert_if_absent`].
#[derive(Debug, Clone)]
pub struct Insertion {
    pub entry: LedgerEntry,
    /// `true` for the caller that created the entry.
    pub created: bool,
}

#[derive(Debug)]
struct Slot {
    entry: watch::Sender<LedgerEntry>,
    context: CancellationToken,
}

impl Slot {
    fn new(entry: LedgerEntry, context: CancellationToken) -> Self {
        let (entry, _) = watch::channel(entry);
        Self { entry, context }
    }

    fn snapshot(&self) -> LedgerEntry {
        self.entry.borrow().clone()
    }
}

/// The delivery ledger.
pub struct Ledger {
    slots: Cache<String, Arc<Slot>>,
    journal: Option<Journal>,
    root: CancellationToken,
}

impl Ledger {
    /// Creates an empty ledger without a journal.
    ///
    /// Request contexts are children of `root`; cancelling it cancels every
    /// request.
    pub fn in_memory(root: CancellationToken) -> Self {
        Self {
            slots: Cache::builder().build(),
            journal: None,
            root,
        }
    }

    /// Opens a journaled ledger, rebuilding it from the journal at `path`.
    ///
    /// # Returns
    /// The ledger and a job for every entry that was still pending when the
    /// journal was last written, ready to be put back on the queue.
    pub async fn open(
        path: impl AsRef<Path>,
        root: CancellationToken,
    ) -> Result<(Self, Vec<Job>), LedgerError> {
        let path = path.as_ref().to_path_buf();
        let (journal, replay) = tokio::task::spawn_blocking(move || Journal::open(path))
            .await
            .map_err(JournalError::from)??;
        let slots = Cache::builder().build();

        let mut unfinished = Vec::new();
        for (request, entry) in replay.entries {
            let context = root.child_token();
            if !entry.is_terminal() {
                unfinished.push(Job::resume(
                    Arc::new(request),
                    entry.next_attempt(),
                    context.clone(),
                ));
            }
            slots
                .insert(entry.dedup_key.clone(), Arc::new(Slot::new(entry, context)))
                .await;
        }

        if !unfinished.is_empty() {
            info!(count = unfinished.len(), "Recovered unfinished deliveries from journal");
        }

        Ok((
            Self {
                slots,
                journal: Some(journal),
                root,
            },
            unfinished,
        ))
    }

    async fn record(&self, record: JournalRecord) -> Result<(), LedgerError> {
        if let Some(journal) = &self.journal {
            journal.append(&record).await?;
        }
        Ok(())
    }

    async fn slot(&self, dedup_key: &str) -> Result<Arc<Slot>, LedgerError> {
        self.slots
            .get(dedup_key)
            .await
            .ok_or_else(|| LedgerError::UnknownKey(dedup_key.to_string()))
    }

    /// Creates a pending entry for the request unless one already exists
    /// under its dedup key.
    ///
    /// Under concurrent calls with the same key exactly one caller sees
    /// `created == true`; all others get the winner's entry.
    #[instrument(skip_all, fields(dedup_key = %request.dedup_key))]
    pub async fn insert_if_absent(
        &self,
        request: &NotificationRequest,
    ) -> Result<Insertion, LedgerError> {
        let key = request.dedup_key.clone();
        let root = &self.root;
        let entry = self
            .slots
            .entry(key.clone())
            .or_insert_with(async {
                Arc::new(Slot::new(LedgerEntry::pending(request), root.child_token()))
            })
            .await;

        let created = entry.is_fresh();
        let slot = entry.into_value();
        if created {
            let record = JournalRecord::Insert {
                request: request.clone(),
                entry: slot.snapshot(),
            };
            if let Err(e) = self.record(record).await {
                self.slots.invalidate(&key).await;
                return Err(e);
            }
            debug!("Created ledger entry");
        }

        Ok(Insertion {
            entry: slot.snapshot(),
            created,
        })
    }

    /// Appends an attempt to an existing entry.
    #[instrument(skip_all, fields(dedup_key = %dedup_key, attempt = attempt.attempt_number))]
    pub async fn append_attempt(
        &self,
        dedup_key: &str,
        attempt: DeliveryAttempt,
    ) -> Result<LedgerEntry, LedgerError> {
        let slot = self.slot(dedup_key).await?;
        if slot.entry.borrow().is_terminal() {
            return Err(LedgerError::AlreadyFinal(dedup_key.to_string()));
        }

        self.record(JournalRecord::Attempt {
            dedup_key: dedup_key.to_string(),
            attempt: attempt.clone(),
        })
        .await?;
        slot.entry.send_modify(|entry| entry.attempts.push(attempt));
        Ok(slot.snapshot())
    }

    /// Moves an entry into its terminal state.
    #[instrument(skip_all, fields(dedup_key = %dedup_key, outcome = outcome.as_str()))]
    pub async fn finalize(
        &self,
        dedup_key: &str,
        outcome: Outcome,
        detail: Option<String>,
    ) -> Result<LedgerEntry, LedgerError> {
        debug_assert!(outcome.is_terminal(), "finalize needs a terminal outcome");
        let slot = self.slot(dedup_key).await?;
        if slot.entry.borrow().is_terminal() {
            return Err(LedgerError::AlreadyFinal(dedup_key.to_string()));
        }

        let completed_at = Utc::now();
        self.record(JournalRecord::Finalize {
            dedup_key: dedup_key.to_string(),
            outcome,
            detail: detail.clone(),
            completed_at,
        })
        .await?;
        slot.entry.send_modify(|entry| {
            entry.final_outcome = outcome;
            entry.detail = detail;
            entry.completed_at = Some(completed_at);
        });
        metrics::counter!("notifications_finalized_total", "outcome" => outcome.as_str())
            .increment(1);
        Ok(slot.snapshot())
    }

    /// Settles an entry as a permanent failure after its delivery could not be
    /// recorded.
    ///
    /// The outcome is journaled when possible. If the journal write fails too,
    /// the entry is still settled in memory so that waiters are released; the
    /// journal then still shows it unfinished and it is retried after a
    /// restart. Returns `None` for an unknown key and the current entry if it
    /// was already final.
    #[instrument(skip_all, fields(dedup_key = %dedup_key))]
    pub async fn abandon(&self, dedup_key: &str, detail: String) -> Option<LedgerEntry> {
        let slot = self.slots.get(dedup_key).await?;
        if slot.entry.borrow().is_terminal() {
            return Some(slot.snapshot());
        }

        let outcome = Outcome::PermanentFailure;
        let completed_at = Utc::now();
        let record = JournalRecord::Finalize {
            dedup_key: dedup_key.to_string(),
            outcome,
            detail: Some(detail.clone()),
            completed_at,
        };
        if let Err(e) = self.record(record).await {
            error!(error = %e, "Journal unavailable, settling entry in memory only");
        }
        slot.entry.send_modify(|entry| {
            entry.final_outcome = outcome;
            entry.detail = Some(detail);
            entry.completed_at = Some(completed_at);
        });
        metrics::counter!("notifications_finalized_total", "outcome" => outcome.as_str())
            .increment(1);
        Some(slot.snapshot())
    }

    /// Rolls back an entry that never made it onto the queue.
    pub async fn remove(&self, dedup_key: &str) -> Result<(), LedgerError> {
        let slot = self.slot(dedup_key).await?;
        {
            let entry = slot.entry.borrow();
            if entry.is_terminal() || !entry.attempts.is_empty() {
                return Err(LedgerError::NotRemovable(dedup_key.to_string()));
            }
        }

        self.record(JournalRecord::Remove {
            dedup_key: dedup_key.to_string(),
        })
        .await?;
        self.slots.invalidate(dedup_key).await;
        Ok(())
    }

    /// Returns the current entry, if any.
    pub async fn get(&self, dedup_key: &str) -> Option<LedgerEntry> {
        self.slots.get(dedup_key).await.map(|slot| slot.snapshot())
    }

    /// Returns a receiver that observes every change to the entry.
    pub async fn subscribe(&self, dedup_key: &str) -> Option<watch::Receiver<LedgerEntry>> {
        self.slots.get(dedup_key).await.map(|slot| slot.entry.subscribe())
    }

    /// Returns the cancellation context of the entry's request.
    pub async fn context(&self, dedup_key: &str) -> Option<CancellationToken> {
        self.slots.get(dedup_key).await.map(|slot| slot.context.clone())
    }

    /// A snapshot of every entry, in no particular order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.slots.iter().map(|(_, slot)| slot.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_journaled(&self) -> bool {
        self.journal.is_some()
    }

    /// Sends all further journal writes to `file`. A no-op without a journal.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn replace_journal_file(&self, file: std::fs::File) {
        if let Some(journal) = &self.journal {
            journal.replace_file(file);
        }
    }
}
