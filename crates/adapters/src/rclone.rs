// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cloud-remote copy adapter built on `rclone` (§4.1).

use std::path::PathBuf;

use bku_core::{DeletionMode, JobId, Progress, ProgressDelta, VerificationMode};

use crate::engine::{seed_progress, DeletionSpec, Engine, ToolDriver};
use crate::termination::{classify_rclone, TerminationClass};

pub struct RcloneDriver {
    source: PathBuf,
    remote_dest: String,
    bandwidth_limit: u64,
    /// `move` when per-file deletion requires the source removed as each
    /// file lands; `copy` otherwise (verification gates removal instead).
    use_move: bool,
}

impl RcloneDriver {
    fn args(&self) -> Vec<String> {
        let operation = if self.use_move { "move" } else { "copy" };
        let mut args = vec![
            operation.to_string(),
            self.source.display().to_string(),
            self.remote_dest.clone(),
            "--progress".to_string(),
            "--stats".to_string(),
            "1s".to_string(),
            "--stats-one-line".to_string(),
            "--retries".to_string(),
            "1".to_string(),
            "--low-level-retries".to_string(),
            "3".to_string(),
        ];
        if self.bandwidth_limit > 0 {
            args.push("--bwlimit".to_string());
            args.push(format!("{}k", self.bandwidth_limit));
        }
        args
    }
}

impl ToolDriver for RcloneDriver {
    fn tool_name(&self) -> &'static str {
        "rclone"
    }

    fn build_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("rclone");
        cmd.args(self.args());
        cmd
    }

    fn progress_on_stderr(&self) -> bool {
        true
    }

    fn parse_line(&self, line: &str) -> ProgressDelta {
        crate::progress_parse::parse_rclone_line(line)
    }

    fn classify(&self, exit_code: i32, tail: &[String]) -> TerminationClass {
        classify_rclone(exit_code, tail)
    }
}

/// Cloud-copy transfer engine (rclone-backed).
pub type CloudCopyAdapter = Engine<RcloneDriver>;

/// Build a [`CloudCopyAdapter`] for one job run. `use_move` selects
/// `rclone move` over `rclone copy` for per-file deletion jobs, matching
/// the engine that decides removal as part of the transfer itself rather
/// than via a later pass.
#[allow(clippy::too_many_arguments)]
pub fn new_cloud_copy_adapter(
    job_id: JobId,
    source: PathBuf,
    remote_dest: String,
    bandwidth_limit: u64,
    verification_mode: VerificationMode,
    delete_source_after: bool,
    deletion_mode: DeletionMode,
    max_retries: u32,
    log_path: PathBuf,
    deletion_log_path: PathBuf,
) -> CloudCopyAdapter {
    let use_move = delete_source_after && deletion_mode == DeletionMode::PerFile;
    let driver = RcloneDriver { source: source.clone(), remote_dest, bandwidth_limit, use_move };
    let initial_progress: Progress = seed_progress(verification_mode, delete_source_after, deletion_mode);
    // No cloud-remote VerifyThenDeleteTarget exists yet: a VerifyThenDelete
    // job against a cloud destination runs its pipeline with no target,
    // which reports DeletionPhase::Failed without touching the source.
    let deletion =
        delete_source_after.then(|| DeletionSpec { source, mode: deletion_mode, audit_log_path: deletion_log_path, verify_target: None });
    Engine::new(driver, job_id, max_retries, initial_progress, log_path, deletion)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(use_move: bool, bandwidth_limit: u64) -> RcloneDriver {
        RcloneDriver {
            source: PathBuf::from("/src"),
            remote_dest: "remote:bucket/path".to_string(),
            bandwidth_limit,
            use_move,
        }
    }

    #[test]
    fn per_file_deletion_uses_move() {
        let args = driver(true, 0).args();
        assert_eq!(args[0], "move");
    }

    #[test]
    fn default_operation_is_copy() {
        let args = driver(false, 0).args();
        assert_eq!(args[0], "copy");
    }

    #[test]
    fn bandwidth_limit_is_suffixed_with_k() {
        let args = driver(false, 2000).args();
        let idx = args.iter().position(|a| a == "--bwlimit").unwrap();
        assert_eq!(args[idx + 1], "2000k");
    }

    #[test]
    fn always_includes_single_retry_and_low_level_retries() {
        let args = driver(false, 0).args();
        assert!(args.windows(2).any(|w| w == ["--retries", "1"]));
        assert!(args.windows(2).any(|w| w == ["--low-level-retries", "3"]));
    }
}
