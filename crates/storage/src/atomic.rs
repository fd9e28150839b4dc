// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The atomic-write primitive shared by the job store and the settings
//! store (§4.3/§4.9): backup, write-to-temp, exclusive-lock, atomic
//! rename, with automatic retry on transient IO failures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use serde::Serialize;

use bku_core::retry::{retry_with_backoff, RetryPolicy};
use bku_core::{Clock, ErrorEvent, Severity, SystemClock};

use crate::error::StorageError;

/// Serialize `value` as pretty JSON and commit it to `path` via the
/// backup/tmp/lock/rename sequence, retrying transient IO failures with
/// exponential backoff.
pub async fn write_json<T>(path: &Path, value: &T, component: &str) -> Result<(), StorageError>
where
    T: Serialize + Send + Sync,
{
    let bytes = serde_json::to_vec_pretty(value)?;
    let path = path.to_path_buf();
    let policy = RetryPolicy::new(3, Duration::from_millis(500), component);
    retry_with_backoff(&policy, || {
        let path = path.clone();
        let bytes = bytes.clone();
        async move { tokio::task::spawn_blocking(move || commit(&path, &bytes)).await.expect("blocking write task panicked") }
    })
    .await
}

fn commit(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    if path.exists() {
        let backup_path = bak_path(path);
        if let Err(err) = fs::copy(path, &backup_path) {
            tracing::warn!(path = %path.display(), %err, "failed to create backup before write");
        }
    }

    let tmp_path = tmp_path(path);
    let lock_path = lock_path(path);

    let lock_file = fs::OpenOptions::new().create(true).write(true).open(&lock_path)?;
    lock_file.lock_exclusive()?;

    let result = fs::write(&tmp_path, bytes).and_then(|()| fs::rename(&tmp_path, path));

    if result.is_err() && tmp_path.exists() {
        let _ = fs::remove_file(&tmp_path);
    }

    let _ = fs2::FileExt::unlock(&lock_file);
    result.map_err(StorageError::from)
}

/// Read and parse `path` as JSON, recovering from `path.bak` on any parse
/// or IO failure. Returns `fallback()` (and logs) if both are unreadable;
/// `report` is additionally handed a Critical [`ErrorEvent`] in that case
/// so a caller with an error log can surface it.
pub fn read_json_with_recovery<T, F, R>(path: &Path, fallback: F, report: R) -> T
where
    T: serde::de::DeserializeOwned,
    F: FnOnce() -> T,
    R: FnOnce(ErrorEvent),
{
    match read_json(path) {
        Ok(value) => return value,
        Err(err) => {
            tracing::error!(path = %path.display(), %err, "primary store file unreadable, attempting backup recovery");
        }
    }

    let backup = bak_path(path);
    match read_json(&backup) {
        Ok(value) => {
            tracing::warn!(path = %path.display(), "recovered store contents from backup");
            let _ = fs::copy(&backup, path);
            value
        }
        Err(err) => {
            tracing::error!(path = %backup.display(), %err, "backup also unreadable, falling back to empty document");
            let event = ErrorEvent::from_error(&err, "StorageCorrupted", Severity::Critical, "storage", SystemClock.epoch_ms())
                .with_details(format!("both {} and its backup are unreadable", path.display()));
            report(event);
            fallback()
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    if !path.exists() {
        return Err(StorageError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "store file missing")));
    }
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn bak_path(path: &Path) -> PathBuf {
    path.with_extension("bak")
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("tmp")
}

fn lock_path(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        jobs: Vec<String>,
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let doc = Doc { jobs: vec!["a".into(), "b".into()] };
        write_json(&path, &doc, "test").await.unwrap();

        let read: Doc = read_json_with_recovery(&path, || Doc { jobs: vec![] }, |_| {});
        assert_eq!(read, doc);
    }

    #[tokio::test]
    async fn second_write_creates_backup_of_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        write_json(&path, &Doc { jobs: vec!["first".into()] }, "test").await.unwrap();
        write_json(&path, &Doc { jobs: vec!["second".into()] }, "test").await.unwrap();

        assert!(bak_path(&path).exists());
        let backup: Doc = read_json(&bak_path(&path)).unwrap();
        assert_eq!(backup.jobs, vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn recovers_from_backup_when_primary_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        write_json(&path, &Doc { jobs: vec!["good".into()] }, "test").await.unwrap();
        write_json(&path, &Doc { jobs: vec!["good".into(), "second".into()] }, "test").await.unwrap();

        fs::write(&path, b"{not valid json").unwrap();

        let recovered: Doc = read_json_with_recovery(&path, || Doc { jobs: vec![] }, |_| {});
        assert_eq!(recovered.jobs, vec!["good".to_string()]);
    }

    #[tokio::test]
    async fn falls_back_to_empty_when_both_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        fs::write(&path, b"{not valid").unwrap();
        fs::write(bak_path(&path), b"also not valid").unwrap();

        let recovered: Doc = read_json_with_recovery(&path, || Doc { jobs: vec!["fallback".into()] }, |_| {});
        assert_eq!(recovered.jobs, vec!["fallback".to_string()]);
    }

    #[tokio::test]
    async fn both_corrupt_reports_critical_error_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        fs::write(&path, b"{not valid").unwrap();
        fs::write(bak_path(&path), b"also not valid").unwrap();

        let reported = Mutex::new(None);
        let _recovered: Doc =
            read_json_with_recovery(&path, || Doc { jobs: vec![] }, |event| *reported.lock() = Some(event));

        let event = reported.lock().take().expect("both-corrupt path should report an error event");
        assert_eq!(event.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn tmp_file_is_cleaned_up_after_successful_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        write_json(&path, &Doc { jobs: vec![] }, "test").await.unwrap();
        assert!(!tmp_path(&path).exists());
    }
}
