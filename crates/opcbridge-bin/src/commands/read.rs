// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `read` command.

use opcbridge_core::{OpcData, ReadMode};

use crate::cli::{Cli, OutputFormat, ReadArgs};
use crate::error::BinResult;
use crate::runtime::BridgeRuntime;

/// Executes the `read` command: one batched read, printed in request order.
pub async fn read(cli: &Cli, args: ReadArgs) -> BinResult<()> {
    let config = super::load_config(cli)?;
    let mut profile = config.session_profile()?;
    if args.device {
        profile.read_mode = ReadMode::Device;
    }

    let runtime = BridgeRuntime::new(config, false);
    runtime.start().await?;
    let result = read_tags(&runtime, profile, &args.tags).await;
    runtime.stop().await?;

    print_samples(&result?, args.format)
}

async fn read_tags(
    runtime: &BridgeRuntime,
    profile: opcbridge_core::SessionProfile,
    tags: &[String],
) -> BinResult<Vec<OpcData>> {
    let session = runtime.open_session_with(profile).await?;
    let samples = session.read(tags).await;
    runtime.connection().release_session(&session).await?;
    Ok(samples?)
}

fn print_samples(samples: &[OpcData], format: OutputFormat) -> BinResult<()> {
    match format {
        OutputFormat::Text => {
            let width = samples.iter().map(|s| s.tag.len()).max().unwrap_or(0);
            for sample in samples {
                if sample.status.is_ok() {
                    println!(
                        "{:<width$}  {}  [{}]",
                        sample.tag,
                        sample.value,
                        sample.quality,
                        width = width
                    );
                } else {
                    println!("{:<width$}  {}", sample.tag, sample.status, width = width);
                }
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(samples)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use opcbridge_config::{BridgeConfig, ConnectionConfig};
    use opcbridge_core::{Protocol, Value};

    use super::*;

    #[tokio::test]
    async fn test_read_preserves_order() {
        let config = BridgeConfig::new(ConnectionConfig::new(Protocol::Da, "sim"));
        let profile = config.session_profile().unwrap();
        let runtime = BridgeRuntime::new(config, false);
        runtime.start().await.unwrap();

        let tags = vec![
            "Plant.Name".to_string(),
            "Missing.Tag".to_string(),
            "Line1.Recipe".to_string(),
        ];
        let samples = read_tags(&runtime, profile, &tags).await.unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].tag, "Plant.Name");
        assert!(samples[0].status.is_ok());
        assert!(samples[1].status.is_error());
        assert_eq!(samples[1].value, Value::Null);
        assert_eq!(samples[2].tag, "Line1.Recipe");
        assert_eq!(runtime.connection().session_count(), 0);

        print_samples(&samples, OutputFormat::Text).unwrap();
        runtime.stop().await.unwrap();
    }
}
