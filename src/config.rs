//! Configuration management for Telenotify
//!
//! This module defines the main `Config` struct and its sub-structs. It uses
//! the `figment` crate to layer compiled-in defaults, an optional
//! `telenotify.toml` file, `TELENOTIFY_` environment variables and finally the
//! command-line flags.

use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::cli::Cli;

/// The default configuration file, read from the working directory when
/// `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "telenotify.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    /// The logging level, in `tracing_subscriber::EnvFilter` syntax.
    pub log_level: String,
    pub queue: QueueConfig,
    pub dispatch: DispatchConfig,
    pub ledger: LedgerConfig,
    pub channels: ChannelsConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            queue: QueueConfig::default(),
            dispatch: DispatchConfig::default(),
            ledger: LedgerConfig::default(),
            channels: ChannelsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Configuration for the notification queue.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of jobs waiting for a worker.
    pub max_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_capacity: 1024 }
    }
}

/// Configuration for the dispatcher and its worker pool.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,
    /// Retries allowed after the first attempt of a transient failure.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub backoff_base_ms: u64,
    /// Upper bound for any retry delay, in milliseconds.
    pub backoff_cap_ms: u64,
    /// Fraction in `[0, 1]` by which a retry delay may be randomly shortened.
    pub jitter: f64,
    /// Payloads larger than this are rejected at submission.
    pub max_payload_bytes: usize,
    /// How long shutdown waits for in-flight work before cancelling it.
    pub shutdown_grace_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_retries: 5,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            jitter: 0.2,
            max_payload_bytes: 4096,
            shutdown_grace_seconds: 30,
        }
    }
}

/// Configuration for the delivery ledger.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct LedgerConfig {
    /// Write-ahead journal location. The ledger is memory-only when unset.
    pub journal_path: Option<PathBuf>,
}

/// Per-channel adapter configuration.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct ChannelsConfig {
    pub email: ChannelConfig,
    pub sms: ChannelConfig,
    pub push: ChannelConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ChannelConfig {
    pub enabled: bool,
    /// Provider webhook. Deliveries are only logged when unset.
    pub endpoint: Option<String>,
    /// Per-request timeout for the provider webhook.
    pub timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            timeout_ms: 10_000,
        }
    }
}

/// Configuration for the Prometheus exporter.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_address: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: SocketAddr::from(([127, 0, 0, 1], 9095)),
        }
    }
}

impl Config {
    /// Loads the configuration by layering defaults, the TOML file, the
    /// environment and the command-line arguments, then validates it.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if cli.config.is_some() && !config_path.exists() {
            bail!("configuration file {} does not exist", config_path.display());
        }

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            // e.g. TELENOTIFY_DISPATCH__WORKER_COUNT=8
            .merge(Env::prefixed("TELENOTIFY_").split("__"))
            .merge(cli.clone())
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_capacity == 0 {
            bail!("queue.max_capacity must be at least 1");
        }
        if self.dispatch.worker_count == 0 {
            bail!("dispatch.worker_count must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.dispatch.jitter) {
            bail!(
                "dispatch.jitter must be between 0 and 1, got {}",
                self.dispatch.jitter
            );
        }
        if self.dispatch.backoff_cap_ms < self.dispatch.backoff_base_ms {
            bail!(
                "dispatch.backoff_cap_ms ({}) is below dispatch.backoff_base_ms ({})",
                self.dispatch.backoff_cap_ms,
                self.dispatch.backoff_base_ms
            );
        }
        if self.dispatch.max_payload_bytes == 0 {
            bail!("dispatch.max_payload_bytes must be at least 1");
        }
        Ok(())
    }
}
