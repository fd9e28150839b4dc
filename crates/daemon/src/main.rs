// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backup job supervisor daemon (`ojd`, §4.11).
//!
//! Background process that owns the live transfer engines and the
//! durable job store. Exposes an IPC socket for `oj` (the CLI) and any
//! other subscriber.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod error_log;
mod fanout;
mod lifecycle;
mod listener;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use bku_core::ErrorEvent;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};

use lifecycle::{Config, LifecycleError, StartupResult};
use listener::{ListenCtx, Listener};

/// How often the error log snapshot is persisted to `errors.json`.
const ERROR_LOG_SAVE_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("ojd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                eprintln!("error: unexpected argument '{other}'");
                eprintln!("usage: ojd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load();
    let log_guard = logging::init(&config.log_path)?;

    info!("starting backup job supervisor daemon");

    let StartupResult { daemon, listener: unix_listener } = match lifecycle::startup(&config).await {
        Ok(result) => result,
        Err(LifecycleError::LockFailed(_)) => {
            let pid = std::fs::read_to_string(&config.lock_path).unwrap_or_default();
            eprintln!("ojd is already running");
            if !pid.trim().is_empty() {
                eprintln!("  pid: {}", pid.trim());
            }
            std::process::exit(1);
        }
        Err(err) => {
            error!(%err, "failed to start daemon");
            drop(log_guard);
            return Err(err.into());
        }
    };

    let daemon = Arc::new(daemon);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ctx = Arc::new(ListenCtx {
        supervisor: Arc::clone(&daemon.supervisor),
        error_log: Arc::clone(&daemon.error_log),
        fanout: Arc::clone(&daemon.fanout),
        start_time: daemon.start_time,
    });
    tokio::spawn(Listener::new(unix_listener, ctx).run());

    let error_log_sink = Arc::clone(&daemon.error_log);
    let error_log_fn: Arc<dyn Fn(ErrorEvent) + Send + Sync> = Arc::new(move |event| error_log_sink.log_error(event));
    let monitor_handle = tokio::spawn(bku_engine::run_loop(
        Arc::clone(&daemon.supervisor),
        Arc::clone(&daemon.fanout) as Arc<dyn bku_engine::EventSink>,
        error_log_fn,
        shutdown_rx,
    ));

    spawn_error_log_saver(Arc::clone(&daemon));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(socket = %config.socket_path.display(), "daemon ready");
    println!("READY");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    let _ = shutdown_tx.send(true);
    let _ = monitor_handle.await;
    daemon.shutdown().await;

    drop(log_guard);
    Ok(())
}

fn spawn_error_log_saver(daemon: Arc<lifecycle::DaemonState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ERROR_LOG_SAVE_INTERVAL);
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            interval.tick().await;
            daemon.save_error_log().await;
        }
    });
}

fn print_help() {
    println!("ojd {}", env!("CARGO_PKG_VERSION"));
    println!("Backup job supervisor daemon");
    println!();
    println!("usage: ojd");
    println!();
    println!("The daemon is normally started by the `oj` CLI and should not be");
    println!("invoked directly. It listens on a Unix socket for commands from `oj`.");
    println!();
    println!("options:");
    println!("    -h, --help       print help information");
    println!("    -V, --version    print version information");
}
