// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Logging and tracing initialization.
//!
//! Precedence of the level: `RUST_LOG`, then `--quiet` / `--verbose` / `--log-level`, then the
//! configuration file, then `info`.

use std::path::Path;

use opcbridge_config::{ConfigLoader, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Cli, LogFormat};

// =============================================================================
// Logging Initialization
// =============================================================================

/// Resolves level and format from flags and the configuration file.
pub fn resolve(cli: &Cli) -> (String, LogFormat) {
    let configured = configured_logging(&cli.config);
    let level = cli
        .forced_log_level()
        .map(str::to_string)
        .or_else(|| configured.as_ref().map(|c| c.level.as_str().to_string()))
        .unwrap_or_else(|| "info".to_string());
    let format = cli
        .log_format
        .or_else(|| configured.map(|c| c.format.into()))
        .unwrap_or_default();
    (level, format)
}

fn configured_logging(path: &Path) -> Option<LoggingConfig> {
    if !path.exists() {
        return None;
    }
    ConfigLoader::new().load(path).ok().map(|config| config.logging)
}

/// Initializes the global subscriber.
pub fn init_logging(level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let is_terminal = std::io::IsTerminal::is_terminal(&std::io::stderr());

    // Samples go to stdout; logs stay on stderr.
    match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_ansi(is_terminal),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true),
            )
            .init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_ansi(is_terminal),
            )
            .init(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::io::Write;

    use clap::Parser;
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_resolve_from_config() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(
            b"connection:\n  protocol: ua\n  host: plc\nlogging:\n  level: debug\n  format: json\n",
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::parse_from(["opcbridge", "-c", path.as_str()]);
        assert_eq!(resolve(&cli), ("debug".to_string(), LogFormat::Json));

        let cli = Cli::parse_from(["opcbridge", "-c", path.as_str(), "-q", "--log-format", "compact"]);
        assert_eq!(resolve(&cli), ("warn".to_string(), LogFormat::Compact));
    }

    #[test]
    fn test_resolve_without_config() {
        let cli = Cli::parse_from(["opcbridge", "-c", "/nonexistent/opcbridge.yaml"]);
        assert_eq!(resolve(&cli), ("info".to_string(), LogFormat::Text));
    }
}
