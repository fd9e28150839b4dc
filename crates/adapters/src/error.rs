// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("{tool} is not installed or not on PATH")]
    ToolNotInstalled { tool: &'static str },
    #[error("a transfer is already running for this job")]
    AlreadyRunning,
    #[error("failed to spawn {tool}: {source}")]
    SpawnFailed { tool: &'static str, #[source] source: std::io::Error },
    #[error("io error reading child output: {0}")]
    Io(#[from] std::io::Error),
    #[error("transfer exited with an unrecoverable error: {0}")]
    Fatal(String),
}
