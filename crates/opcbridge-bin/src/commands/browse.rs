// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `browse` command.

use opcbridge_core::{BrowseNode, OpcConnection};
use serde::Serialize;

use crate::cli::{BrowseArgs, Cli, OutputFormat};
use crate::error::BinResult;
use crate::runtime::BridgeRuntime;

/// A node with its depth below the browse root (children of the root are level 0).
#[derive(Debug, Serialize)]
struct Entry {
    level: u32,
    #[serde(flatten)]
    node: BrowseNode,
}

/// Executes the `browse` command.
pub async fn browse(cli: &Cli, args: BrowseArgs) -> BinResult<()> {
    let config = super::load_config(cli)?;
    let root = args.root.clone().unwrap_or_default();

    let runtime = BridgeRuntime::new(config, false);
    runtime.start().await?;
    let result = walk(runtime.connection(), &root, args.depth.max(1)).await;
    runtime.stop().await?;

    let entries = result?;
    match args.format {
        OutputFormat::Text => {
            println!("{}", if root.is_empty() { "/" } else { root.as_str() });
            for entry in &entries {
                let indent = "  ".repeat(entry.level as usize + 1);
                let marker = if entry.node.has_children { "+" } else { "-" };
                println!("{}{} {}  ({})", indent, marker, entry.node.name, entry.node.id);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
    }
    Ok(())
}

/// Depth-first walk, pre-order, descending at most `depth` levels.
async fn walk(connection: &OpcConnection, root: &str, depth: u32) -> BinResult<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut pending: Vec<Entry> = connection
        .browse(root)
        .await?
        .into_iter()
        .rev()
        .map(|node| Entry { level: 0, node })
        .collect();

    while let Some(entry) = pending.pop() {
        if entry.node.has_children && entry.level + 1 < depth {
            let children = connection.browse(&entry.node.id).await?;
            let level = entry.level + 1;
            pending.extend(
                children
                    .into_iter()
                    .rev()
                    .map(|node| Entry { level, node }),
            );
        }
        entries.push(entry);
    }
    Ok(entries)
}
