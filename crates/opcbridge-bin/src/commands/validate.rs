// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use std::collections::HashSet;

use opcbridge_config::BridgeConfig;
use opcbridge_sim::default_catalogue;

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{BinError, BinResult};

/// Executes the `validate` command to validate configuration.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config_path = &cli.config;
    let config = super::load_config(cli).map_err(|e| match e {
        BinError::Config(e) => {
            BinError::Configuration(format!("Configuration validation failed: {}", e))
        }
        other => other,
    })?;

    let warnings = collect_warnings(&config);
    let endpoint = config.connection_profile()?.describe();

    match args.format {
        OutputFormat::Text => {
            println!("✓ Configuration is valid: {}", config_path.display());
            println!();
            println!("Summary:");
            println!("  Protocol: {}", config.connection.protocol);
            println!("  Endpoint: {}", endpoint);
            println!(
                "  Liveness: every {:?}, timeout {:?}",
                config.liveness.period, config.liveness.timeout
            );
            println!(
                "  Reconnect: {}",
                if config.reconnect.enabled { "enabled" } else { "disabled" }
            );
            println!("  Refresh period: {:?}", config.session.refresh_period);
            println!("  Watched tags: {}", config.watch.tags.len());
            println!("  Simulated tags: {}", simulated_tags(&config).len());

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "valid": true,
                "config_path": config_path.display().to_string(),
                "summary": {
                    "protocol": config.connection.protocol,
                    "endpoint": endpoint,
                    "reconnect_enabled": config.reconnect.enabled,
                    "refresh_period_ms": config.session.refresh_period.as_millis() as u64,
                    "watched_tags": config.watch.tags.len(),
                    "simulated_tags": simulated_tags(&config).len(),
                },
                "warnings": warnings,
                "config": if args.show_config { Some(&config) } else { None },
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn simulated_tags(config: &BridgeConfig) -> Vec<String> {
    if config.simulation.tags.is_empty() {
        default_catalogue().into_iter().map(|tag| tag.name).collect()
    } else {
        config.simulation.tags.iter().map(|tag| tag.name.clone()).collect()
    }
}

fn collect_warnings(config: &BridgeConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.watch.tags.is_empty() {
        warnings.push("No watch tags configured; `watch` needs --tag".to_string());
    }

    if !config.reconnect.enabled {
        warnings.push("Auto-reconnect is disabled".to_string());
    }

    if config.session.refresh_period < config.simulation.min_rate {
        warnings.push(format!(
            "Refresh period {:?} is below the server minimum {:?} and will be revised",
            config.session.refresh_period, config.simulation.min_rate
        ));
    }

    let known: HashSet<String> = simulated_tags(config).into_iter().collect();
    for watched in &config.watch.tags {
        if !known.contains(&watched.tag) {
            warnings.push(format!("Watch tag not in the address space: {}", watched.tag));
        }
    }

    warnings
}

// =============================================================================
// Tests
// =============================================================================
