// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bku_core::JobId;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {0} cannot be started from its current status")]
    CannotStart(JobId),
    #[error("job {0} is not running")]
    NotRunning(JobId),
    #[error("job {0} has a live engine and cannot be deleted")]
    LiveEngine(JobId),
    #[error("invalid job definition: {0}")]
    Validation(String),
    #[error("deletion pre-flight check failed: {0}")]
    Preflight(#[from] bku_adapters::PreflightError),
    #[error(transparent)]
    Adapter(#[from] bku_adapters::AdapterError),
    #[error(transparent)]
    Storage(#[from] bku_storage::StorageError),
}
