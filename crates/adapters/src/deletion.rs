// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deletion pipeline (§4.2): pre-flight safety checks plus the two
//! source-deletion modes run after a transfer succeeds. Source data is
//! never removed unless the destination is provably complete.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bku_core::{DeletionMode, DeletionPhase, VerifyResult};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    #[error("source {0:?} does not exist or is empty")]
    SourceEmptyOrMissing(PathBuf),
    #[error("insufficient free space at destination: need {needed} bytes, have {available} bytes")]
    InsufficientSpace { needed: u64, available: u64 },
    #[error("source and destination resolve to the same path")]
    SourceEqualsDestination,
    #[error("io error during pre-flight check: {0}")]
    Io(#[from] std::io::Error),
}

/// Space headroom required at a local destination, relative to the
/// estimated source size (§4.2: "1.10 × source_size").
const SPACE_HEADROOM: f64 = 1.10;

/// Run the three pre-flight safety checks before a deletion-eligible job
/// is allowed to start. `dest_is_local` selects whether the free-space
/// check applies; cloud destinations only get the existence/self-path
/// checks plus a caller-visible warning.
pub async fn preflight_check(source: &Path, dest: &Path, dest_is_local: bool) -> Result<Option<String>, PreflightError> {
    let source_size = directory_size(source).await?;
    if source_size == 0 {
        return Err(PreflightError::SourceEmptyOrMissing(source.to_path_buf()));
    }

    if dest_is_local {
        let canonical_source = tokio::fs::canonicalize(source).await.ok();
        let canonical_dest = tokio::fs::canonicalize(dest).await.ok();
        if canonical_source.is_some() && canonical_source == canonical_dest {
            return Err(PreflightError::SourceEqualsDestination);
        }

        let available = free_space_at(dest).await?;
        let needed = (source_size as f64 * SPACE_HEADROOM) as u64;
        if available < needed {
            return Err(PreflightError::InsufficientSpace { needed, available });
        }
        Ok(None)
    } else {
        Ok(Some("deletion requested against a cloud destination: free-space check skipped".to_string()))
    }
}

/// Count regular files under `path`, for the audit log's `estimated_files`
/// entry. Best-effort: any walk error just yields an undercount.
pub async fn count_files(path: &Path) -> u64 {
    let mut total = 0u64;
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else { continue };
        while let Ok(Some(entry)) = entries.next_entry().await {
            match entry.metadata().await {
                Ok(meta) if meta.is_dir() => stack.push(entry.path()),
                Ok(_) => total += 1,
                Err(_) => {}
            }
        }
    }
    total
}

async fn directory_size(path: &Path) -> Result<u64, std::io::Error> {
    let metadata = tokio::fs::metadata(path).await?;
    if metadata.is_file() {
        return Ok(metadata.len());
    }
    let mut total = 0u64;
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

async fn free_space_at(path: &Path) -> Result<u64, std::io::Error> {
    // `fs2` exposes free-space queries synchronously; dispatched through
    // `spawn_blocking` to keep the async pre-flight check non-blocking.
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || fs2::available_space(&path))
        .await
        .unwrap_or_else(|join_err| Err(std::io::Error::other(join_err)))
}

/// One audit-log entry kind (§4.2).
enum AuditEntry<'a> {
    Start { mode: DeletionMode, estimated_files: u64 },
    Deleted { path: &'a Path, size: u64, note: Option<&'a str> },
    End { total_files: u64, total_bytes: u64, errors: u64 },
}

struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn write(&self, entry: AuditEntry<'_>) {
        let line = match entry {
            AuditEntry::Start { mode, estimated_files } => {
                format!("{} START mode={mode:?} estimated_files={estimated_files}\n", now_epoch_ms())
            }
            AuditEntry::Deleted { path, size, note } => {
                let note = note.unwrap_or("");
                format!("{} DELETED path={} size={size} note={note}\n", now_epoch_ms(), path.display())
            }
            AuditEntry::End { total_files, total_bytes, errors } => {
                format!("{} END total_files={total_files} total_bytes={total_bytes} errors={errors}\n", now_epoch_ms())
            }
        };
        // Best-effort per §4.2: a failing audit write never aborts deletion.
        if let Ok(mut file) = tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await {
            let _ = file.write_all(line.as_bytes()).await;
        }
    }
}

fn now_epoch_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0)
}

/// Result of running the deletion pipeline to completion (or to its
/// failure point).
#[derive(Debug, Clone)]
pub struct DeletionOutcome {
    pub phase: DeletionPhase,
    pub files_deleted: u64,
    pub bytes_deleted: u64,
    pub errors: u64,
}

/// Bottom-up removal of now-empty directories under `root`, stopping at
/// `root` itself (never removes the source root directory).
async fn prune_empty_dirs(root: &Path) -> std::io::Result<()> {
    let mut dirs = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut has_subdir = false;
        while let Some(entry) = entries.next_entry().await? {
            if entry.metadata().await?.is_dir() {
                has_subdir = true;
                stack.push(entry.path());
            }
        }
        if has_subdir {
            dirs.push(dir);
        } else if dir != root {
            dirs.push(dir);
        }
    }
    // Deepest paths first so a child directory is always removed before
    // its parent is considered.
    dirs.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    for dir in dirs {
        if dir == root {
            continue;
        }
        let mut entries = tokio::fs::read_dir(&dir).await?;
        if entries.next_entry().await?.is_none() {
            let _ = tokio::fs::remove_dir(&dir).await;
        }
    }
    Ok(())
}

/// Run the `PerFile` mode's post-transfer cleanup: the adapter has
/// already removed each file as it was transferred, so this only prunes
/// the emptied directory tree and writes the summary log entry.
pub async fn run_per_file_cleanup(source: &Path, audit_log_path: PathBuf, estimated_files: u64) -> DeletionOutcome {
    let log = AuditLog::new(audit_log_path);
    log.write(AuditEntry::Start { mode: DeletionMode::PerFile, estimated_files }).await;

    let result = prune_empty_dirs(source).await;
    let errors = u64::from(result.is_err());
    log.write(AuditEntry::End { total_files: estimated_files, total_bytes: 0, errors }).await;

    DeletionOutcome {
        phase: if result.is_ok() { DeletionPhase::Completed } else { DeletionPhase::Failed },
        files_deleted: estimated_files,
        bytes_deleted: 0,
        errors,
    }
}

/// A minimal contract the verify/delete phases drive against, so the
/// pipeline stays tool-agnostic (local filesystem walk vs. a cloud
/// remote's own compare/delete operations both implement it).
#[async_trait::async_trait]
pub trait VerifyThenDeleteTarget: Send + Sync {
    /// Compare source and destination; `Ok(true)` only if every file
    /// matches (checksum or size+mtime, per the job's verification mode).
    async fn verify(&self) -> std::io::Result<bool>;
    /// Remove every verified source file, reporting each removal to the
    /// audit log via the provided callback; returns (files, bytes, errors).
    async fn delete_all(&self, on_delete: &mut dyn FnMut(&Path, u64)) -> (u64, u64, u64);
}

/// Drive the three-phase `VerifyThenDelete` pipeline (§4.2) against a
/// [`VerifyThenDeleteTarget`].
pub async fn run_verify_then_delete(
    source: &Path,
    target: &dyn VerifyThenDeleteTarget,
    audit_log_path: PathBuf,
    estimated_files: u64,
) -> (DeletionOutcome, VerifyResult) {
    run_verify_then_delete_with_phase(source, target, audit_log_path, estimated_files, &mut |_| {}).await
}

/// Same pipeline as [`run_verify_then_delete`], but invoking `on_phase`
/// as each phase is entered so a caller (the transfer engine) can mirror
/// the transition onto the job's live progress snapshot.
pub async fn run_verify_then_delete_with_phase(
    source: &Path,
    target: &dyn VerifyThenDeleteTarget,
    audit_log_path: PathBuf,
    estimated_files: u64,
    on_phase: &mut dyn FnMut(DeletionPhase),
) -> (DeletionOutcome, VerifyResult) {
    let log = AuditLog::new(audit_log_path);
    log.write(AuditEntry::Start { mode: DeletionMode::VerifyThenDelete, estimated_files }).await;

    on_phase(DeletionPhase::Verifying);
    let verify_passed = match target.verify().await {
        Ok(passed) => passed,
        Err(_) => false,
    };

    if !verify_passed {
        log.write(AuditEntry::End { total_files: 0, total_bytes: 0, errors: 1 }).await;
        on_phase(DeletionPhase::Failed);
        return (
            DeletionOutcome { phase: DeletionPhase::Failed, files_deleted: 0, bytes_deleted: 0, errors: 1 },
            VerifyResult::Failed,
        );
    }

    on_phase(DeletionPhase::Deleting);
    let mut total_files = 0u64;
    let mut total_bytes = 0u64;
    let deleted_entries = Mutex::new(Vec::<(PathBuf, u64)>::new());
    let mut record = |path: &Path, size: u64| {
        deleted_entries.lock().push((path.to_path_buf(), size));
    };
    let (files, bytes, errors) = target.delete_all(&mut record).await;
    total_files += files;
    total_bytes += bytes;

    for (path, size) in deleted_entries.into_inner() {
        log.write(AuditEntry::Deleted { path: &path, size, note: None }).await;
    }

    let cleanup_result = prune_empty_dirs(source).await;
    let phase = if cleanup_result.is_ok() { DeletionPhase::Completed } else { DeletionPhase::Failed };
    on_phase(phase);

    log.write(AuditEntry::End { total_files, total_bytes, errors }).await;

    (DeletionOutcome { phase, files_deleted: total_files, bytes_deleted: total_bytes, errors }, VerifyResult::Passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::tempdir;

    #[tokio::test]
    async fn preflight_rejects_empty_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("empty_src");
        tokio::fs::create_dir_all(&source).await.unwrap();
        let dest = dir.path().join("dst");
        tokio::fs::create_dir_all(&dest).await.unwrap();

        let result = preflight_check(&source, &dest, true).await;
        assert!(matches!(result, Err(PreflightError::SourceEmptyOrMissing(_))));
    }

    #[tokio::test]
    async fn preflight_rejects_same_path() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        tokio::fs::create_dir_all(&source).await.unwrap();
        tokio::fs::write(source.join("file.txt"), b"data").await.unwrap();

        let result = preflight_check(&source, &source, true).await;
        assert!(matches!(result, Err(PreflightError::SourceEqualsDestination)));
    }

    #[tokio::test]
    async fn preflight_on_cloud_dest_skips_space_check_and_warns() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        tokio::fs::create_dir_all(&source).await.unwrap();
        tokio::fs::write(source.join("file.txt"), b"data").await.unwrap();

        let result = preflight_check(&source, Path::new("remote:bucket"), false).await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn per_file_cleanup_prunes_now_empty_tree() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        tokio::fs::create_dir_all(source.join("nested/deeper")).await.unwrap();

        let audit = dir.path().join("audit.log");
        let outcome = run_per_file_cleanup(&source, audit.clone(), 3).await;

        assert_eq!(outcome.phase, DeletionPhase::Completed);
        assert!(!source.join("nested").exists());
        assert!(source.exists(), "source root itself is never removed");
        let log_contents = tokio::fs::read_to_string(&audit).await.unwrap();
        assert!(log_contents.contains("START"));
        assert!(log_contents.contains("END"));
    }

    struct FailingVerifyTarget;
    #[async_trait::async_trait]
    impl VerifyThenDeleteTarget for FailingVerifyTarget {
        async fn verify(&self) -> std::io::Result<bool> {
            Ok(false)
        }
        async fn delete_all(&self, _on_delete: &mut dyn FnMut(&Path, u64)) -> (u64, u64, u64) {
            panic!("delete must never run when verify fails");
        }
    }

    #[tokio::test]
    async fn verify_failure_never_deletes() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        tokio::fs::create_dir_all(&source).await.unwrap();
        let audit = dir.path().join("audit.log");

        let (outcome, verify) = run_verify_then_delete(&source, &FailingVerifyTarget, audit, 1).await;
        assert_eq!(outcome.phase, DeletionPhase::Failed);
        assert_eq!(verify, VerifyResult::Failed);
    }

    struct SucceedingVerifyTarget {
        files: Vec<(PathBuf, u64)>,
    }
    #[async_trait::async_trait]
    impl VerifyThenDeleteTarget for SucceedingVerifyTarget {
        async fn verify(&self) -> std::io::Result<bool> {
            Ok(true)
        }
        async fn delete_all(&self, on_delete: &mut dyn FnMut(&Path, u64)) -> (u64, u64, u64) {
            let total_bytes = AtomicU64::new(0);
            for (path, size) in &self.files {
                on_delete(path, *size);
                total_bytes.fetch_add(*size, Ordering::Relaxed);
            }
            (self.files.len() as u64, total_bytes.load(Ordering::Relaxed), 0)
        }
    }

    #[tokio::test]
    async fn verify_success_deletes_and_logs_each_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        tokio::fs::create_dir_all(&source).await.unwrap();
        let audit = dir.path().join("audit.log");

        let target = SucceedingVerifyTarget { files: vec![(source.join("a.txt"), 10), (source.join("b.txt"), 20)] };
        let (outcome, verify) = run_verify_then_delete(&source, &target, audit.clone(), 2).await;

        assert_eq!(outcome.phase, DeletionPhase::Completed);
        assert_eq!(outcome.files_deleted, 2);
        assert_eq!(outcome.bytes_deleted, 30);
        assert_eq!(verify, VerifyResult::Passed);

        let log_contents = tokio::fs::read_to_string(&audit).await.unwrap();
        assert_eq!(log_contents.matches("DELETED").count(), 2);
    }
}
