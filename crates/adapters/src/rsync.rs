// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local-to-local/local-to-mounted copy adapter built on `rsync` (§4.1).

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;

use bku_core::{DeletionMode, JobId, Progress, ProgressDelta, VerificationMode};

use crate::deletion::VerifyThenDeleteTarget;
use crate::engine::{seed_progress, DeletionSpec, Engine, ToolDriver};
use crate::local_verify::LocalFsVerifyTarget;
use crate::termination::{classify_rsync, TerminationClass};

/// Probed once per process: whether the installed rsync binary supports
/// `--append-verify`, used for checksum-on-resume verification.
static APPEND_VERIFY_SUPPORT: OnceLock<bool> = OnceLock::new();

async fn supports_append_verify() -> bool {
    if let Some(cached) = APPEND_VERIFY_SUPPORT.get() {
        return *cached;
    }
    let output = tokio::process::Command::new("rsync").arg("--help").output().await;
    let supported = match output {
        Ok(out) => {
            let text = String::from_utf8_lossy(&out.stdout);
            text.contains("--append-verify")
        }
        Err(_) => false,
    };
    *APPEND_VERIFY_SUPPORT.get_or_init(|| supported)
}

pub struct RsyncDriver {
    source: PathBuf,
    dest: PathBuf,
    bandwidth_limit: u64,
    verification_mode: VerificationMode,
    delete_source_after: bool,
    deletion_mode: DeletionMode,
    append_verify: bool,
}

impl RsyncDriver {
    fn args(&self) -> Vec<String> {
        let mut args = vec!["-ah".to_string(), "--partial".to_string(), "--progress".to_string()];
        if self.verification_mode == VerificationMode::Checksum {
            args.push("--checksum".to_string());
        }
        if self.append_verify {
            args.push("--append-verify".to_string());
        }
        if self.bandwidth_limit > 0 {
            args.push(format!("--bwlimit={}", self.bandwidth_limit));
        }
        // PerFile deletion (§4.2) is delegated to rsync directly; a
        // VerifyThenDelete run instead leaves the source untouched here and
        // runs as a separate pass once the transfer completes.
        if self.delete_source_after && self.deletion_mode == DeletionMode::PerFile {
            args.push("--remove-source-files".to_string());
        }
        args.push(self.source.display().to_string());
        args.push(self.dest.display().to_string());
        args
    }
}

impl ToolDriver for RsyncDriver {
    fn tool_name(&self) -> &'static str {
        "rsync"
    }

    fn build_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("rsync");
        cmd.args(self.args());
        cmd
    }

    fn progress_on_stderr(&self) -> bool {
        false
    }

    fn parse_line(&self, line: &str) -> ProgressDelta {
        crate::progress_parse::parse_rsync_line(line)
    }

    fn classify(&self, exit_code: i32, tail: &[String]) -> TerminationClass {
        classify_rsync(exit_code, tail)
    }
}

/// Local-copy transfer engine (rsync-backed).
pub type LocalCopyAdapter = Engine<RsyncDriver>;

/// Build a [`LocalCopyAdapter`] for one job run, probing `--append-verify`
/// support up front so the constructed command is accurate from the first
/// attempt.
#[allow(clippy::too_many_arguments)]
pub async fn new_local_copy_adapter(
    job_id: JobId,
    source: PathBuf,
    dest: PathBuf,
    bandwidth_limit: u64,
    verification_mode: VerificationMode,
    delete_source_after: bool,
    deletion_mode: DeletionMode,
    max_retries: u32,
    log_path: PathBuf,
    deletion_log_path: PathBuf,
) -> LocalCopyAdapter {
    let append_verify = supports_append_verify().await && verification_mode == VerificationMode::VerifyAfter;
    let driver = RsyncDriver {
        source: source.clone(),
        dest: dest.clone(),
        bandwidth_limit,
        verification_mode,
        delete_source_after,
        deletion_mode,
        append_verify,
    };
    let initial_progress: Progress = seed_progress(verification_mode, delete_source_after, deletion_mode);
    let verify_target: Option<Arc<dyn VerifyThenDeleteTarget>> = match deletion_mode {
        DeletionMode::PerFile => None,
        DeletionMode::VerifyThenDelete => Some(Arc::new(LocalFsVerifyTarget::new(source.clone(), dest, verification_mode))),
    };
    let deletion = delete_source_after.then(|| DeletionSpec {
        source,
        mode: deletion_mode,
        audit_log_path: deletion_log_path,
        verify_target,
    });
    Engine::new(driver, job_id, max_retries, initial_progress, log_path, deletion)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(verification_mode: VerificationMode, bandwidth_limit: u64) -> RsyncDriver {
        RsyncDriver {
            source: PathBuf::from("/src"),
            dest: PathBuf::from("/dst"),
            bandwidth_limit,
            verification_mode,
            delete_source_after: false,
            deletion_mode: DeletionMode::PerFile,
            append_verify: false,
        }
    }

    #[test]
    fn per_file_delete_adds_remove_source_files_flag() {
        let mut d = driver(VerificationMode::Fast, 0);
        d.delete_source_after = true;
        assert!(d.args().contains(&"--remove-source-files".to_string()));
    }

    #[test]
    fn verify_then_delete_omits_remove_source_files_flag() {
        let mut d = driver(VerificationMode::Fast, 0);
        d.delete_source_after = true;
        d.deletion_mode = DeletionMode::VerifyThenDelete;
        assert!(!d.args().contains(&"--remove-source-files".to_string()));
    }

    #[test]
    fn checksum_mode_adds_checksum_flag() {
        let args = driver(VerificationMode::Checksum, 0).args();
        assert!(args.contains(&"--checksum".to_string()));
    }

    #[test]
    fn fast_mode_omits_checksum_flag() {
        let args = driver(VerificationMode::Fast, 0).args();
        assert!(!args.contains(&"--checksum".to_string()));
    }

    #[test]
    fn bandwidth_limit_becomes_bwlimit_flag() {
        let args = driver(VerificationMode::Fast, 500).args();
        assert!(args.iter().any(|a| a == "--bwlimit=500"));
    }

    #[test]
    fn zero_bandwidth_limit_omits_bwlimit_flag() {
        let args = driver(VerificationMode::Fast, 0).args();
        assert!(!args.iter().any(|a| a.starts_with("--bwlimit")));
    }

    #[test]
    fn source_and_dest_are_trailing_positional_args() {
        let args = driver(VerificationMode::Fast, 0).args();
        assert_eq!(args[args.len() - 2], "/src");
        assert_eq!(args[args.len() - 1], "/dst");
    }
}
