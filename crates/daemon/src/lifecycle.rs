// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management (§4.11): startup, crash recovery, and
//! graceful shutdown.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bku_core::paths;
use bku_engine::Supervisor;
use bku_storage::{JobStore, SettingsStore};
use fs2::FileExt;
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};

use crate::error_log::{ErrorLog, ErrorLogSnapshot};
use crate::fanout::FanoutHub;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),
    #[error("failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),
    #[error(transparent)]
    Storage(#[from] bku_storage::StorageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Daemon configuration: paths derived from the single data directory
/// (§6: "everything lives under one data directory, resolved once").
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub socket_path: PathBuf,
    pub lock_path: PathBuf,
    pub errors_path: PathBuf,
    pub log_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let data_dir = paths::data_dir();
        Self {
            socket_path: paths::socket_path(&data_dir),
            lock_path: data_dir.join("daemon.pid"),
            errors_path: paths::errors_file(&data_dir),
            log_path: paths::logs_dir(&data_dir).join("daemon.log"),
            data_dir,
        }
    }
}

/// Daemon state during operation. The lock file is held for as long as
/// this lives; dropping it releases the exclusive lock.
pub struct DaemonState {
    pub config: Config,
    #[allow(dead_code)]
    lock_file: File,
    pub supervisor: Arc<Supervisor>,
    pub error_log: Arc<ErrorLog>,
    pub fanout: Arc<FanoutHub>,
    pub start_time: Instant,
}

pub struct StartupResult {
    pub daemon: DaemonState,
    pub listener: UnixListener,
}

/// Start the daemon: acquire the lock, open durable storage, replay
/// crash recovery, and bind the IPC socket. Socket bind happens last so
/// a startup failure never leaves a stale socket for a client to find.
pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    match startup_inner(config).await {
        Ok(result) => Ok(result),
        Err(err) => {
            if !matches!(err, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(err)
        }
    }
}

async fn startup_inner(config: &Config) -> Result<StartupResult, LifecycleError> {
    std::fs::create_dir_all(&config.data_dir)?;

    let lock_file = std::fs::OpenOptions::new().write(true).create(true).truncate(false).open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    let mut lock_file = lock_file;
    writeln!(lock_file, "{}", std::process::id())?;

    let store = Arc::new(JobStore::open(&config.data_dir).await?);
    let settings = Arc::new(SettingsStore::open(&config.data_dir).await?);
    let supervisor = Arc::new(Supervisor::new(store, settings, config.data_dir.clone()));
    supervisor.recover_at_startup();

    // The error log itself doesn't exist yet at this point, so its own
    // snapshot recovery can't report back into it; a corrupt snapshot is
    // only logged via `tracing`, not surfaced as an `ErrorEvent`.
    let error_snapshot: ErrorLogSnapshot =
        bku_storage::atomic::read_json_with_recovery(&config.errors_path, ErrorLogSnapshot::default, |_event| {});
    let error_log = Arc::new(ErrorLog::from_snapshot(error_snapshot));

    let reporter: Arc<dyn Fn(bku_core::ErrorEvent) + Send + Sync> = {
        let error_log = Arc::clone(&error_log);
        Arc::new(move |event| error_log.log_error(event))
    };
    supervisor.store().set_error_reporter(reporter);

    let fanout = Arc::new(FanoutHub::new());

    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .map_err(|err| LifecycleError::BindFailed(config.socket_path.clone(), err))?;

    info!(data_dir = %config.data_dir.display(), "daemon started");

    Ok(StartupResult {
        daemon: DaemonState {
            config: config.clone(),
            lock_file,
            supervisor,
            error_log,
            fanout,
            start_time: Instant::now(),
        },
        listener,
    })
}

impl DaemonState {
    /// Persist the error log snapshot (§6: periodic `errors.json` save).
    pub async fn save_error_log(&self) {
        let snapshot = self.error_log.snapshot();
        if let Err(err) = bku_storage::atomic::write_json(&self.config.errors_path, &snapshot, "error_log").await {
            warn!(%err, "failed to persist error log snapshot");
        }
    }

    /// Graceful shutdown (§4.11): drain the job store's pending writes,
    /// save a final error log snapshot, and remove the socket and lock
    /// files. The lock file itself is released when `self` is dropped.
    pub async fn shutdown(&self) {
        info!("shutting down daemon");
        self.supervisor.store().shutdown().await;
        self.save_error_log().await;

        if self.config.socket_path.exists() {
            if let Err(err) = std::fs::remove_file(&self.config.socket_path) {
                warn!(%err, "failed to remove socket file");
            }
        }
        if self.config.lock_path.exists() {
            if let Err(err) = std::fs::remove_file(&self.config.lock_path) {
                warn!(%err, "failed to remove lock file");
            }
        }
        info!("daemon shutdown complete");
    }
}

fn cleanup_on_failure(config: &Config) {
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}
