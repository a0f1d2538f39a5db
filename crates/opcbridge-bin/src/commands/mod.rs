// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.
//!
//! - `watch`: Stream tag values until interrupted
//! - `read`: One batched read
//! - `browse`: List the children of a node
//! - `validate`: Validate configuration file
//! - `version`: Show version information

mod browse;
mod read;
mod validate;
mod version;
mod watch;

pub use browse::browse;
pub use read::read;
pub use validate::validate;
pub use version::version;
pub use watch::watch;

use opcbridge_config::BridgeConfig;

use crate::cli::{Cli, Commands};
use crate::error::{BinError, BinResult};

/// Executes the command selected on the command line.
pub async fn execute(cli: Cli) -> BinResult<()> {
    match cli.effective_command() {
        Commands::Watch(args) => watch::watch(&cli, args).await,
        Commands::Read(args) => read::read(&cli, args).await,
        Commands::Browse(args) => browse::browse(&cli, args).await,
        Commands::Validate(args) => validate::validate(&cli, args),
        Commands::Version => version::version(&cli),
    }
}

/// Loads the configuration named by `--config`.
pub(crate) fn load_config(cli: &Cli) -> BinResult<BridgeConfig> {
    if !cli.config.exists() {
        return Err(BinError::config(format!(
            "Configuration file not found: {}",
            cli.config.display()
        )));
    }
    Ok(opcbridge_config::load_config(&cli.config)?)
}
