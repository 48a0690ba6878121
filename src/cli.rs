//! Command-Line Interface (CLI) argument parsing.
//!
//! Flags given here take precedence over `telenotify.toml` and the
//! environment: `Cli` is merged into the configuration as the last figment
//! provider.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Dispatches telehealth notifications and tracks their delivery.
///
/// Reads one JSON submission per line from stdin and prints each final ledger
/// entry as a JSON line on stdout.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of concurrent delivery workers.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Maximum number of queued notifications.
    #[arg(long, value_name = "N")]
    pub queue_capacity: Option<usize>,

    /// Retries allowed after the first failed attempt.
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Log filter, e.g. `debug` or `telenotify=trace`.
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Write-ahead journal for the delivery ledger.
    #[arg(long, value_name = "FILE")]
    pub journal: Option<PathBuf>,

    /// Replay a built-in set of alerts and reminders instead of reading stdin.
    #[arg(long)]
    pub demo: bool,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        let mut queue = Dict::new();
        if let Some(capacity) = self.queue_capacity {
            queue.insert("max_capacity".into(), Value::from(capacity));
        }
        if !queue.is_empty() {
            dict.insert("queue".into(), Value::from(queue));
        }

        let mut dispatch = Dict::new();
        if let Some(workers) = self.workers {
            dispatch.insert("worker_count".into(), Value::from(workers));
        }
        if let Some(retries) = self.max_retries {
            dispatch.insert("max_retries".into(), Value::from(retries));
        }
        if !dispatch.is_empty() {
            dict.insert("dispatch".into(), Value::from(dispatch));
        }

        if let Some(journal) = &self.journal {
            let mut ledger = Dict::new();
            ledger.insert(
                "journal_path".into(),
                Value::from(journal.to_string_lossy().into_owned()),
            );
            dict.insert("ledger".into(), Value::from(ledger));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
