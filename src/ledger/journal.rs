//! Append-only JSON-lines journal backing the delivery ledger.
//!
//! Every ledger mutation is written here before it is applied in memory. On
//! startup the journal is replayed to rebuild the ledger, which is how attempt
//! history survives a crash in the middle of a retry sequence.

use crate::core::{DeliveryAttempt, LedgerEntry, NotificationRequest, Outcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("journal I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode journal record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("journal write task failed: {0}")]
    Task(#[from] task::JoinError),

    #[error("journal {path} is corrupt at line {line}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
}

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalRecord {
    Insert {
        request: NotificationRequest,
        entry: LedgerEntry,
    },
    Attempt {
        dedup_key: String,
        attempt: DeliveryAttempt,
    },
    Finalize {
        dedup_key: String,
        outcome: Outcome,
        detail: Option<String>,
        completed_at: DateTime<Utc>,
    },
    Remove {
        dedup_key: String,
    },
}

/// The ledger state rebuilt from a journal, in insertion order.
#[derive(Debug, Default)]
pub struct Replay {
    pub entries: Vec<(NotificationRequest, LedgerEntry)>,
}

impl Replay {
    fn apply(
        order: &mut Vec<String>,
        state: &mut HashMap<String, (NotificationRequest, LedgerEntry)>,
        record: JournalRecord,
    ) {
        match record {
            JournalRecord::Insert { request, entry } => {
                if !state.contains_key(&entry.dedup_key) {
                    order.push(entry.dedup_key.clone());
                }
                state.insert(entry.dedup_key.clone(), (request, entry));
            }
            JournalRecord::Attempt { dedup_key, attempt } => match state.get_mut(&dedup_key) {
                Some((_, entry)) => entry.attempts.push(attempt),
                None => warn!(dedup_key = %dedup_key, "Journal attempt for unknown key, skipping"),
            },
            JournalRecord::Finalize {
                dedup_key,
                outcome,
                detail,
                completed_at,
            } => match state.get_mut(&dedup_key) {
                Some((_, entry)) => {
                    entry.final_outcome = outcome;
                    entry.detail = detail;
                    entry.completed_at = Some(completed_at);
                }
                None => warn!(dedup_key = %dedup_key, "Journal finalize for unknown key, skipping"),
            },
            JournalRecord::Remove { dedup_key } => {
                state.remove(&dedup_key);
                order.retain(|key| key != &dedup_key);
            }
        }
    }
}

/// A write-ahead journal file.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    writer: Arc<Mutex<BufWriter<File>>>,
}

/// What a replay found besides the records themselves.
struct Scan {
    replay: Replay,
    /// Byte length of the readable prefix of the file.
    valid_len: u64,
    /// The readable prefix ends without a line terminator.
    unterminated: bool,
}

impl Journal {
    /// Opens (or creates) the journal at `path` and replays its contents.
    ///
    /// A torn final line, left behind by a crash mid-write, is ignored and cut
    /// off the file so that later appends start on a fresh line. Any other
    /// unreadable line is reported as corruption.
    ///
    /// This does blocking file I/O.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Replay), JournalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let scan = if path.exists() {
            Some(Self::replay(&path)?)
        } else {
            None
        };

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let replay = match scan {
            Some(scan) => {
                let len = file.metadata()?.len();
                if scan.valid_len < len {
                    warn!(
                        path = %path.display(),
                        discarded_bytes = len - scan.valid_len,
                        "Truncating torn journal tail"
                    );
                    file.set_len(scan.valid_len)?;
                }
                if scan.unterminated {
                    file.write_all(b"\n")?;
                }
                file.sync_data()?;
                scan.replay
            }
            None => Replay::default(),
        };
        info!(path = %path.display(), entries = replay.entries.len(), "Opened ledger journal");

        Ok((
            Self {
                path,
                writer: Arc::new(Mutex::new(BufWriter::new(file))),
            },
            replay,
        ))
    }

    fn replay(path: &Path) -> Result<Scan, JournalError> {
        let bytes = std::fs::read(path)?;
        let lines: Vec<&[u8]> = bytes.split_inclusive(|b| *b == b'\n').collect();
        let last = lines.len();

        let mut order = Vec::new();
        let mut state = HashMap::new();
        let mut valid_len = 0;
        for (index, raw) in lines.into_iter().enumerate() {
            let line = raw.strip_suffix(b"\n").unwrap_or(raw);
            if line.iter().all(u8::is_ascii_whitespace) {
                valid_len += raw.len();
                continue;
            }
            match serde_json::from_slice::<JournalRecord>(line) {
                Ok(record) => {
                    Replay::apply(&mut order, &mut state, record);
                    valid_len += raw.len();
                }
                Err(e) if index + 1 == last => {
                    warn!(path = %path.display(), error = %e, "Ignoring torn final journal line");
                }
                Err(source) => {
                    return Err(JournalError::Corrupt {
                        path: path.to_path_buf(),
                        line: index + 1,
                        source,
                    });
                }
            }
        }

        let entries = order
            .into_iter()
            .filter_map(|key| state.remove(&key))
            .collect();
        Ok(Scan {
            replay: Replay { entries },
            valid_len: valid_len as u64,
            unterminated: valid_len > 0 && bytes[valid_len - 1] != b'\n',
        })
    }

    /// Appends one record and syncs it to disk.
    ///
    /// The write runs on the blocking pool; the record is durable once this
    /// returns `Ok`.
    pub async fn append(&self, record: &JournalRecord) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let writer = self.writer.clone();
        task::spawn_blocking(move || {
            let mut writer = writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            writer.write_all(&line)?;
            writer.flush()?;
            writer.get_ref().sync_data()?;
            Ok::<_, JournalError>(())
        })
        .await?
    }

    /// Points all further appends at `file`.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn replace_file(&self, file: File) {
        let mut writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *writer = BufWriter::new(file);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
