// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `watch` command.

use std::time::Duration;

use futures::stream::{select_all, StreamExt};
use opcbridge_config::BridgeConfig;
use opcbridge_core::{OpcData, OpcSession};
use tracing::{info, warn};

use crate::cli::{Cli, OutputFormat, WatchArgs};
use crate::error::{BinError, BinResult};
use crate::runtime::BridgeRuntime;
use crate::shutdown::ShutdownCoordinator;

enum Outcome {
    Shutdown,
    Drained,
    Lost,
}

/// Executes the `watch` command.
pub async fn watch(cli: &Cli, args: WatchArgs) -> BinResult<()> {
    let config = super::load_config(cli)?;
    let tags = watch_list(&config, &args)?;
    let runtime = BridgeRuntime::new(config, !args.no_reconnect);

    let shutdown = ShutdownCoordinator::new();
    shutdown.listen_for_signals();
    if let Some(duration) = args.duration {
        let timer = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            timer.initiate_shutdown();
        });
    }

    runtime.start().await?;
    let result = run(&runtime, &tags, &shutdown, args.format).await;
    runtime.stop().await?;

    let delivered = result?;
    info!(delivered, "Watch finished");
    Ok(())
}

/// Tags to watch with their intervals. Command line tags replace the configured list.
fn watch_list(config: &BridgeConfig, args: &WatchArgs) -> BinResult<Vec<(String, Duration)>> {
    let mut tags = if args.tags.is_empty() {
        config.watch.resolved()
    } else {
        args.tags
            .iter()
            .map(|tag| (tag.clone(), config.watch.default_interval))
            .collect()
    };
    if let Some(interval) = args.interval {
        if interval.is_zero() {
            return Err(BinError::config("--interval must be greater than zero"));
        }
        for (_, tag_interval) in &mut tags {
            *tag_interval = interval;
        }
    }
    if tags.is_empty() {
        return Err(BinError::config(
            "no tags to watch: pass --tag or configure watch.tags",
        ));
    }
    Ok(tags)
}

async fn run(
    runtime: &BridgeRuntime,
    tags: &[(String, Duration)],
    shutdown: &ShutdownCoordinator,
    format: OutputFormat,
) -> BinResult<u64> {
    let mut delivered = 0u64;

    loop {
        let session = runtime.open_session().await?;
        let outcome = follow(&session, tags, shutdown, format, &mut delivered).await;
        if let Err(error) = runtime.connection().release_session(&session).await {
            warn!(session_id = %session.id(), error = %error, "Failed to release session");
        }

        match outcome? {
            Outcome::Shutdown | Outcome::Drained => return Ok(delivered),
            Outcome::Lost => {
                info!("Waiting for the connection to come back");
                let reconnected = tokio::select! {
                    _ = shutdown.cancelled() => return Ok(delivered),
                    connected = runtime.wait_connected() => connected,
                };
                if !reconnected {
                    return Err(BinError::runtime("connection lost and not recovered"));
                }
            }
        }
    }
}

async fn follow(
    session: &OpcSession,
    tags: &[(String, Duration)],
    shutdown: &ShutdownCoordinator,
    format: OutputFormat,
    delivered: &mut u64,
) -> BinResult<Outcome> {
    let mut merged = select_all(tags.iter().map(|(tag, interval)| {
        let tag = tag.clone();
        session
            .stream(&tag, *interval)
            .map(move |item| (tag.clone(), item))
    }));

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(Outcome::Shutdown),
            item = merged.next() => match item {
                Some((_, Ok(sample))) => {
                    print_sample(&sample, format)?;
                    *delivered += 1;
                }
                Some((tag, Err(error))) if error.is_connection_level() => {
                    warn!(tag = %tag, error = %error, "Stream terminated by connection loss");
                    return Ok(Outcome::Lost);
                }
                Some((tag, Err(error))) => {
                    warn!(tag = %tag, error = %error, "Stream terminated");
                }
                None => return Ok(Outcome::Drained),
            },
        }
    }
}

fn print_sample(sample: &OpcData, format: OutputFormat) -> BinResult<()> {
    match format {
        OutputFormat::Text if sample.status.is_ok() => println!("{}", sample),
        OutputFormat::Text => println!("{} ({})", sample, sample.status),
        OutputFormat::Json => println!("{}", serde_json::to_string(sample)?),
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use opcbridge_config::{ConnectionConfig, WatchTag};
    use opcbridge_core::Protocol;

    use super::*;

    fn config() -> BridgeConfig {
        let mut config = BridgeConfig::new(ConnectionConfig::new(Protocol::Ua, "sim"));
        config.watch.tags = vec![
            WatchTag {
                tag: "Line1.Speed".into(),
                interval: Some(Duration::from_millis(250)),
            },
            WatchTag {
                tag: "Line1.Running".into(),
                interval: None,
            },
        ];
        config
    }

    #[test]
    fn test_watch_list_from_config() {
        let tags = watch_list(&config(), &WatchArgs::default()).unwrap();
        assert_eq!(
            tags,
            vec![
                ("Line1.Speed".to_string(), Duration::from_millis(250)),
                ("Line1.Running".to_string(), Duration::from_secs(1)),
            ]
        );
    }

    #[test]
    fn test_watch_list_overrides() {
        let args = WatchArgs {
            tags: vec!["Line2.Count".into()],
            interval: Some(Duration::from_millis(100)),
            ..WatchArgs::default()
        };
        let tags = watch_list(&config(), &args).unwrap();
        assert_eq!(tags, vec![("Line2.Count".to_string(), Duration::from_millis(100))]);
    }

    #[test]
    fn test_watch_list_empty() {
        let config = BridgeConfig::new(ConnectionConfig::new(Protocol::Ua, "sim"));
        assert!(watch_list(&config, &WatchArgs::default()).is_err());
    }

    #[tokio::test]
    async fn test_follow_until_shutdown() {
        let mut config = config();
        config.simulation.update_period = Duration::from_millis(20);
        let runtime = BridgeRuntime::new(config, false);
        runtime.start().await.unwrap();

        let shutdown = ShutdownCoordinator::new();
        let timer = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            timer.initiate_shutdown();
        });

        let tags = vec![("Line1.Count".to_string(), Duration::from_millis(50))];
        let delivered = run(&runtime, &tags, &shutdown, OutputFormat::Json).await.unwrap();
        assert!(delivered >= 1);
        assert_eq!(runtime.connection().session_count(), 0);
        runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_tags_drain() {
        let runtime = BridgeRuntime::new(config(), false);
        runtime.start().await.unwrap();

        let shutdown = ShutdownCoordinator::new();
        let tags = vec![("No.Such.Tag".to_string(), Duration::from_millis(50))];
        let delivered = run(&runtime, &tags, &shutdown, OutputFormat::Text).await.unwrap();
        assert_eq!(delivered, 0);
        runtime.stop().await.unwrap();
    }
}
