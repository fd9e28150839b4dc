// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Logging setup (§4.11): a non-blocking rolling file appender under the
//! data directory's `logs/` subdirectory, filtered by `RUST_LOG` (default
//! `info`).

use std::path::Path;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::lifecycle::LifecycleError;

/// Initializes the global subscriber. The returned guard must be held for
/// the life of the process; dropping it stops the background flush
/// thread and can silently truncate the tail of the log.
pub fn init(log_path: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    let dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let file_name = log_path.file_name().map(|n| n.to_owned()).unwrap_or_else(|| "daemon.log".into());

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(filter).with(fmt::layer().with_writer(non_blocking).with_ansi(false)).init();

    Ok(guard)
}
