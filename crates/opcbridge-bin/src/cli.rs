// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `watch`: Stream tag values (default)
//! - `read`: One batched read
//! - `browse`: List the children of a node
//! - `validate`: Validate configuration file
//! - `version`: Show version information

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// opcbridge - connection and session orchestration for OPC servers
#[derive(Parser, Debug)]
#[command(
    name = "opcbridge",
    author = "Sylvex <contact@sylvex.io>",
    version = opcbridge_core::VERSION,
    about = "Connect to an OPC server, read, browse and stream tags",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "opcbridge.yaml",
        env = "OPCBRIDGE_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log format. Defaults to the configured format
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Stream tag values until interrupted
    ///
    /// Connects to the configured server, opens one session and prints every delivered
    /// sample. This is the default command.
    Watch(WatchArgs),

    /// Read tags once
    Read(ReadArgs),

    /// List the children of a node
    Browse(BrowseArgs),

    /// Validate the configuration file
    Validate(ValidateArgs),

    /// Show detailed version information
    Version,
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `watch` command.
#[derive(Args, Debug, Default, Clone)]
pub struct WatchArgs {
    /// Tag to watch (repeatable). Replaces the configured list
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,

    /// Stream interval for every watched tag
    #[arg(short, long, value_parser = humantime::parse_duration)]
    pub interval: Option<Duration>,

    /// Stop after this long
    #[arg(short, long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Disable auto-reconnect
    #[arg(long)]
    pub no_reconnect: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `read` command.
#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    /// Tags to read, printed in the given order
    #[arg(required = true)]
    pub tags: Vec<String>,

    /// Read from the device instead of the server cache
    #[arg(long)]
    pub device: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `browse` command.
#[derive(Args, Debug, Default, Clone)]
pub struct BrowseArgs {
    /// Node to browse. The root when omitted
    pub root: Option<String>,

    /// Descend into branches up to this depth
    #[arg(short, long, default_value = "1")]
    pub depth: u32,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Default, Clone)]
pub struct ValidateArgs {
    /// Show parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

impl From<opcbridge_config::LogFormat> for LogFormat {
    fn from(format: opcbridge_config::LogFormat) -> Self {
        match format {
            opcbridge_config::LogFormat::Text => LogFormat::Text,
            opcbridge_config::LogFormat::Compact => LogFormat::Compact,
            opcbridge_config::LogFormat::Json => LogFormat::Json,
        }
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The effective command, defaulting to `watch`.
    pub fn effective_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Watch(WatchArgs::default()))
    }

    /// The level forced by flags, if any.
    pub fn forced_log_level(&self) -> Option<&str> {
        if self.quiet {
            Some("warn")
        } else if self.verbose {
            Some("debug")
        } else {
            self.log_level.as_deref()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
