// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! opcbridge - connection and session orchestration for OPC servers
//!
//! Main binary entry point.

use opcbridge_bin::{commands, error, logging, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let (level, format) = logging::resolve(&cli);
    logging::init_logging(&level, format);

    if let Err(e) = commands::execute(cli).await {
        error::report_error_and_exit(e);
    }
}
