// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `oj daemon` — start/health for the background `ojd` process (§4.10/§4.11).

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{anyhow, Result};
use bku_wire::{Request, ResponseData};
use clap::{Args, Subcommand};

use crate::client::{unwrap_response, DaemonClient};
use crate::output::{format_or_json, format_uptime, OutputFormat};

#[derive(Args)]
pub struct DaemonArgs {
    #[command(subcommand)]
    pub command: DaemonCommand,
}

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Start `ojd` in the background if it isn't already running
    Start,
    /// Print daemon health: uptime, live engines, job and error counts (§6)
    Health,
}

pub async fn daemon(args: DaemonArgs, format: OutputFormat) -> Result<()> {
    match args.command {
        DaemonCommand::Start => start().await,
        DaemonCommand::Health => health(format).await,
    }
}

async fn start() -> Result<()> {
    if DaemonClient::connect().await.is_ok() {
        println!("daemon already running");
        return Ok(());
    }

    let ojd_path = find_ojd_binary();
    std::process::Command::new(&ojd_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| anyhow!("failed to spawn {}: {err}", ojd_path.display()))?;

    // The daemon acquires its lock file and binds its socket before
    // printing READY; poll briefly rather than assuming a fixed delay.
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if DaemonClient::connect().await.is_ok() {
            println!("daemon started");
            return Ok(());
        }
    }
    Err(anyhow!("daemon did not become ready in time"))
}

async fn health(format: OutputFormat) -> Result<()> {
    let client = DaemonClient::connect().await.map_err(|err| anyhow!("{err}"))?;
    let response = client.send(&Request::Health).await.map_err(|err| anyhow!("{err}"))?;
    let data = unwrap_response(response).map_err(|err| anyhow!("{err}"))?;
    let summary = match data {
        Some(ResponseData::Health(summary)) => summary,
        _ => return Err(anyhow!("daemon returned an unexpected response to health check")),
    };

    format_or_json(format, &summary, || {
        println!("uptime: {}", format_uptime(summary.uptime_secs));
        println!("live engines: {}", summary.live_engines);
        println!("jobs running: {}", summary.jobs_running);
        println!("unresolved errors: {}", summary.unresolved_errors);
        println!("errors in last 24h: {}", summary.errors_last_24h);
        println!("critical errors: {}", summary.critical_errors);
    })
}

/// Locate the `ojd` binary alongside this executable, falling back to `$PATH`.
fn find_ojd_binary() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("ojd");
            if sibling.exists() {
                return sibling;
            }
        }
    }
    PathBuf::from("ojd")
}
