// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bku_core::retry::Retriable;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unrecognized key in settings document: {0}")]
    Validation(String),
}

impl Retriable for StorageError {
    /// IO failures (disk full, transient permission errors, concurrent
    /// access from another process) are worth retrying; malformed JSON
    /// and validation errors are not — retrying won't fix a parse error.
    fn is_transient(&self) -> bool {
        matches!(self, StorageError::Io(_))
    }
}
