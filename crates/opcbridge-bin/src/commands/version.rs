// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use crate::cli::Cli;
use crate::error::BinResult;

/// Executes the `version` command to display version information.
pub fn version(_cli: &Cli) -> BinResult<()> {
    println!("opcbridge - connection and session orchestration for OPC servers");
    println!();
    println!("Version Information:");
    println!("  opcbridge-bin:    {}", env!("CARGO_PKG_VERSION"));
    println!("  opcbridge-core:   {}", opcbridge_core::VERSION);
    println!("  opcbridge-config: {}", opcbridge_config::VERSION);
    println!("  opcbridge-sim:    {}", opcbridge_sim::VERSION);
    println!();
    println!("Build Information:");
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
    println!();
    println!("Protocols:");
    println!("  DA (classic), UA");
    println!();
    println!("License: PolyForm Noncommercial License 1.0.0");
    println!("Copyright (c) 2025 Sylvex. All rights reserved.");

    Ok(())
}
