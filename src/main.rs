//! Telenotify - notification dispatch and delivery tracking
//!
//! Reads one JSON submission per line from stdin, delivers them through the
//! configured channels and prints ledger entries as JSON lines.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use serde::Deserialize;
use telenotify::{
    app::App,
    cli::Cli,
    config::Config,
    core::{ChannelKind, LedgerEntry, NotificationRequest, Priority},
    producers,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// One line of input.
#[derive(Debug, Deserialize)]
struct Submission {
    recipient: String,
    channel: ChannelKind,
    payload: String,
    #[serde(default)]
    priority: Priority,
    dedup_key: Option<String>,
}

impl From<Submission> for NotificationRequest {
    fn from(submission: Submission) -> Self {
        let request = NotificationRequest::new(
            submission.recipient,
            submission.channel,
            submission.payload,
            submission.priority,
        );
        match submission.dedup_key {
            Some(key) => request.with_dedup_key(key),
            None => request,
        }
    }
}

fn print_entry(entry: &LedgerEntry) {
    match serde_json::to_string(entry) {
        Ok(line) => println!("{}", line),
        Err(e) => error!("Failed to encode ledger entry: {}", e),
    }
}

fn demo_requests() -> Vec<NotificationRequest> {
    let now = Utc::now();
    let due_at = (now + ChronoDuration::hours(1)).format("%Y-%m-%d %H:%M").to_string();
    vec![
        producers::emergency_alert(
            "PAT123",
            "High blood pressure detected!",
            "doctor@hospital.com",
            ChannelKind::email(),
            Priority::Critical,
            now,
        ),
        producers::panic_button("PAT123", "doctor@hospital.com", ChannelKind::email(), now),
        producers::reminder("+1234567890", "Take your medication", &due_at, ChannelKind::sms()),
    ]
}

async fn read_stdin(notifier: &telenotify::Notifier, keys: &mut Vec<String>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        let submission: Submission = match serde_json::from_str(&line) {
            Ok(submission) => submission,
            Err(e) => {
                warn!(line = line_number, "Skipping malformed submission: {}", e);
                continue;
            }
        };
        let request = NotificationRequest::from(submission);
        let key = request.dedup_key.clone();
        match notifier.submit(request).await {
            Ok(entry) => {
                print_entry(&entry);
                keys.push(key);
            }
            Err(e) => warn!(line = line_number, dedup_key = %key, "Submission refused: {}", e),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = Config::load(&cli).unwrap_or_else(|err| {
        tracing_subscriber::fmt().with_writer(std::io::stderr).init();
        error!("Failed to load configuration: {:#}", err);
        std::process::exit(1);
    });

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Telenotify starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Queue Capacity: {}", config.queue.max_capacity);
    info!("Worker Count: {}", config.dispatch.worker_count);
    info!("Max Retries: {}", config.dispatch.max_retries);
    info!(
        "Backoff: {}ms base, {}ms cap, jitter {}",
        config.dispatch.backoff_base_ms, config.dispatch.backoff_cap_ms, config.dispatch.jitter
    );
    match &config.ledger.journal_path {
        Some(path) => info!("Ledger Journal: {}", path.display()),
        None => info!("Ledger Journal: Disabled (in-memory)"),
    }
    for (name, channel) in [
        ("Email", &config.channels.email),
        ("SMS", &config.channels.sms),
        ("Push", &config.channels.push),
    ] {
        let target = match (&channel.endpoint, channel.enabled) {
            (_, false) => "Disabled".to_string(),
            (Some(endpoint), true) => endpoint.clone(),
            (None, true) => "Log only".to_string(),
        };
        info!("{} Channel: {}", name, target);
    }
    info!("-------------------------------------------------------");

    let app = App::builder(config).build().await?;
    if let Some(addr) = app.metrics_addr() {
        info!("Metrics available at http://{}/metrics", addr);
    }
    if app.recovered() > 0 {
        info!("Resuming {} deliveries from the journal", app.recovered());
    }
    let notifier = app.notifier();

    let mut keys = Vec::new();
    if cli.demo {
        for request in demo_requests() {
            let key = request.dedup_key.clone();
            match notifier.submit(request).await {
                Ok(entry) => {
                    print_entry(&entry);
                    keys.push(key);
                }
                Err(e) => warn!(dedup_key = %key, "Demo submission refused: {}", e),
            }
        }
    } else {
        tokio::select! {
            result = read_stdin(&notifier, &mut keys) => result?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, no longer reading input.");
            }
        }
    }

    tokio::select! {
        _ = async {
            for key in &keys {
                match notifier.wait_for_outcome(key).await {
                    Ok(entry) => print_entry(&entry),
                    Err(e) => warn!("{}", e),
                }
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Shutting down gracefully...");
        }
    }

    app.shutdown().await
}
