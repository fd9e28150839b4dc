// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single source of truth for the daemon's data directory layout.
//!
//! All collaborators ask the resolver for a path; nobody builds a per-job
//! log path or store path by hand.

use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "OJ_DATA_DIR";

/// Resolve the data directory: `OJ_DATA_DIR` if set, otherwise
/// `dirs::data_dir()/oj-backup`. The directory is created if missing.
pub fn data_dir() -> PathBuf {
    let dir = match std::env::var_os(DATA_DIR_ENV) {
        Some(v) if !v.is_empty() => PathBuf::from(v),
        _ => dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("oj-backup"),
    };
    let _ = std::fs::create_dir_all(&dir);
    dir
}

pub fn jobs_file(data_dir: &Path) -> PathBuf {
    data_dir.join("jobs.json")
}

pub fn settings_file(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

pub fn errors_file(data_dir: &Path) -> PathBuf {
    data_dir.join("errors.json")
}

pub fn socket_path(data_dir: &Path) -> PathBuf {
    data_dir.join("oj-backup.sock")
}

/// Logs directory, created on first use.
pub fn logs_dir(data_dir: &Path) -> PathBuf {
    let dir = data_dir.join("logs");
    let _ = std::fs::create_dir_all(&dir);
    dir
}

/// Per-job transfer log path, e.g. `logs/local_copy_<job-id>.log`.
pub fn transfer_log_path(data_dir: &Path, job_type: &str, job_id: &str) -> PathBuf {
    logs_dir(data_dir).join(format!("{job_type}_{job_id}.log"))
}

/// Per-job deletion audit log path.
pub fn deletion_log_path(data_dir: &Path, job_id: &str) -> PathBuf {
    logs_dir(data_dir).join(format!("deletions_{job_id}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn env_override_wins() {
        let _guard = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_var(DATA_DIR_ENV, tmp.path());
        assert_eq!(data_dir(), tmp.path());
        std::env::remove_var(DATA_DIR_ENV);
    }

    #[test]
    fn derived_paths_are_under_data_dir() {
        let base = PathBuf::from("/tmp/oj-test-data");
        assert_eq!(jobs_file(&base), base.join("jobs.json"));
        assert_eq!(settings_file(&base), base.join("settings.json"));
        assert_eq!(socket_path(&base), base.join("oj-backup.sock"));
    }
}
