// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "tally.log";

/// Installs the global subscriber. Output goes to a daily rolling file in
/// `log_dir` because the terminal belongs to the TUI. Keep the returned
/// guard alive until exit so buffered lines are flushed.
pub fn init(log_dir: &Path, default_level: &str) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(default_level))
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|error| anyhow::anyhow!("install log subscriber: {error}"))?;
    Ok(guard)
}

/// `TALLY_LOG` wins over `RUST_LOG`, which wins over the configured level.
fn build_env_filter(default_level: &str) -> EnvFilter {
    if let Ok(directives) = std::env::var("TALLY_LOG")
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return filter;
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::try_new(default_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::build_env_filter;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn configured_level_is_used_without_env_overrides() {
        if std::env::var_os("TALLY_LOG").is_some() || std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert_eq!(
            build_env_filter("debug").max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
    }

    #[test]
    fn garbage_level_falls_back_to_info() {
        if std::env::var_os("TALLY_LOG").is_some() || std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert_eq!(
            build_env_filter("tally=loud").max_level_hint(),
            Some(LevelFilter::INFO)
        );
    }
}
