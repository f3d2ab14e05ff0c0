//! cryptodetect - language server entry point.
//!
//! Speaks LSP on stdin/stdout, so nothing else may write to stdout. Logs go
//! to `~/.cryptodetect/logs/cryptodetect.log` (or stderr if no log file can
//! be opened).

mod config;

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cryptodetect_lsp::ServerConfig;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Stdout carries the protocol; stderr is the only safe fallback.
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.cryptodetect/logs/cryptodetect.log
    if let Some(dir) = config::config_dir() {
        candidates.push(dir.join("logs").join("cryptodetect.log"));
    }

    // Fallback: ./.cryptodetect/logs/cryptodetect.log
    candidates.push(
        PathBuf::from(".cryptodetect")
            .join("logs")
            .join("cryptodetect.log"),
    );

    candidates
}

/// File config, or defaults if it is missing or broken.
fn load_config() -> ServerConfig {
    match config::load() {
        Ok(Some(config)) => config,
        Ok(None) => ServerConfig::default(),
        Err(e) => {
            tracing::warn!(path = %e.path().display(), "{e}; using defaults");
            ServerConfig::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();

    let config = load_config();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        engine = %config.analyzer.program,
        "Starting cryptodetect"
    );

    cryptodetect_lsp::serve_stdio(config)
        .await
        .context("language server failed")
}
