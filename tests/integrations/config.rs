//! Layered configuration loading.

use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use telenotify::{cli::Cli, config::Config};
use tempfile::NamedTempFile;

/// Runs a test with a temporary config file.
fn with_config_file<F>(toml_content: &str, test_fn: F)
where
    F: FnOnce(PathBuf),
{
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", toml_content).unwrap();
    test_fn(file.path().to_path_buf());
}

fn cli(args: &[&str]) -> Cli {
    Cli::parse_from(std::iter::once("telenotify").chain(args.iter().copied()))
}

#[test]
fn test_load_full_valid_config() {
    let toml_content = r#"
        log_level = "debug"

        [queue]
        max_capacity = 500

        [dispatch]
        worker_count = 8
        max_retries = 2
        backoff_base_ms = 250
        backoff_cap_ms = 4000
        jitter = 0.5
        max_payload_bytes = 2048
        shutdown_grace_seconds = 3

        [ledger]
        journal_path = "/var/lib/telenotify/ledger.jsonl"

        [channels.sms]
        endpoint = "https://sms.example.com/send"
        timeout_ms = 1500

        [channels.push]
        enabled = false

        [metrics]
        enabled = true
        listen_address = "0.0.0.0:9100"
    "#;

    with_config_file(toml_content, |path| {
        let config = Config::load(&cli(&["--config", path.to_str().unwrap()])).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.queue.max_capacity, 500);
        assert_eq!(config.dispatch.worker_count, 8);
        assert_eq!(config.dispatch.max_retries, 2);
        assert_eq!(config.dispatch.backoff_base_ms, 250);
        assert_eq!(config.dispatch.backoff_cap_ms, 4000);
        assert_eq!(config.dispatch.jitter, 0.5);
        assert_eq!(config.dispatch.max_payload_bytes, 2048);
        assert_eq!(config.dispatch.shutdown_grace_seconds, 3);
        assert_eq!(
            config.ledger.journal_path,
            Some(PathBuf::from("/var/lib/telenotify/ledger.jsonl"))
        );
        assert_eq!(
            config.channels.sms.endpoint.as_deref(),
            Some("https://sms.example.com/send")
        );
        assert_eq!(config.channels.sms.timeout_ms, 1500);
        assert!(config.channels.email.enabled);
        assert!(!config.channels.push.enabled);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.listen_address.port(), 9100);
    });
}

#[test]
fn test_partial_config_keeps_defaults() {
    with_config_file("[dispatch]\nworker_count = 3\n", |path| {
        let config = Config::load(&cli(&["--config", path.to_str().unwrap()])).unwrap();
        let defaults = Config::default();

        assert_eq!(config.dispatch.worker_count, 3);
        assert_eq!(config.dispatch.max_retries, defaults.dispatch.max_retries);
        assert_eq!(config.queue.max_capacity, defaults.queue.max_capacity);
        assert!(config.ledger.journal_path.is_none());
    });
}

#[test]
fn test_cli_overrides_file() {
    with_config_file("[dispatch]\nworker_count = 3\nmax_retries = 7\n", |path| {
        let config = Config::load(&cli(&[
            "--config",
            path.to_str().unwrap(),
            "--workers",
            "12",
            "--queue-capacity",
            "9",
            "--log-level",
            "warn",
        ]))
        .unwrap();

        assert_eq!(config.dispatch.worker_count, 12);
        assert_eq!(config.dispatch.max_retries, 7);
        assert_eq!(config.queue.max_capacity, 9);
        assert_eq!(config.log_level, "warn");
    });
}

#[test]
fn test_invalid_values_are_rejected() {
    with_config_file("[dispatch]\njitter = 2.0\n", |path| {
        let err = Config::load(&cli(&["--config", path.to_str().unwrap()])).unwrap_err();
        assert!(err.to_string().contains("jitter"));
    });

    with_config_file("[queue]\nmax_capacity = 0\n", |path| {
        assert!(Config::load(&cli(&["--config", path.to_str().unwrap()])).is_err());
    });
}

#[test]
fn test_missing_explicit_config_file_is_an_error() {
    let result = Config::load(&cli(&["--config", "/definitely/not/here/telenotify.toml"]));
    assert!(result.is_err());
}
