// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job identifier, status, progress, and settings types.

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a backup job.
    pub struct JobId("job-");
}

/// What kind of transfer tool backs a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    LocalCopy,
    CloudCopy,
}

crate::simple_display! {
    JobType {
        LocalCopy => "local_copy",
        CloudCopy => "cloud_copy",
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

crate::simple_display! {
    JobStatus {
        Pending => "pending",
        Running => "running",
        Paused => "paused",
        Completed => "completed",
        Failed => "failed",
    }
}

impl JobStatus {
    /// Start is accepted only from these states.
    pub fn can_start(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Paused | JobStatus::Failed)
    }

    /// Stop is accepted only from Running.
    pub fn can_stop(self) -> bool {
        matches!(self, JobStatus::Running)
    }
}

/// Verification tri-state: unknown until the Verify phase runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyResult {
    Unknown,
    Passed,
    Failed,
}

impl VerifyResult {
    pub fn passed(self) -> bool {
        matches!(self, VerifyResult::Passed)
    }
}

/// Verification sub-block of a job's progress snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationState {
    pub enabled: bool,
    pub passed: VerifyResult,
    pub files_checked: u64,
    pub mismatches: u64,
}

impl VerificationState {
    pub fn disabled() -> Self {
        Self { enabled: false, passed: VerifyResult::Unknown, files_checked: 0, mismatches: 0 }
    }

    pub fn enabled() -> Self {
        Self { enabled: true, passed: VerifyResult::Unknown, files_checked: 0, mismatches: 0 }
    }
}

/// Source-deletion mode selected by `JobSettings::deletion_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionMode {
    VerifyThenDelete,
    PerFile,
}

/// Current phase of the deletion pipeline (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionPhase {
    None,
    Transfer,
    Verifying,
    Deleting,
    Completed,
    Failed,
}

crate::simple_display! {
    DeletionPhase {
        None => "none",
        Transfer => "transfer",
        Verifying => "verifying",
        Deleting => "deleting",
        Completed => "completed",
        Failed => "failed",
    }
}

/// Deletion sub-block of a job's progress snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionState {
    pub enabled: bool,
    pub mode: DeletionMode,
    pub phase: DeletionPhase,
    pub files_deleted: u64,
    pub bytes_deleted: u64,
}

impl DeletionState {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            mode: DeletionMode::VerifyThenDelete,
            phase: DeletionPhase::None,
            files_deleted: 0,
            bytes_deleted: 0,
        }
    }

    pub fn new(mode: DeletionMode) -> Self {
        Self { enabled: true, mode, phase: DeletionPhase::None, files_deleted: 0, bytes_deleted: 0 }
    }
}

/// Verification strictness, shared between process-wide settings and
/// per-job overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    Fast,
    Checksum,
    VerifyAfter,
}

impl Default for VerificationMode {
    fn default() -> Self {
        VerificationMode::Fast
    }
}

/// Recognized per-job settings (§3). Unrecognized keys are rejected at the
/// deserialization boundary rather than silently preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct JobSettings {
    /// KB/s; 0 = unlimited.
    pub bandwidth_limit: u64,
    pub delete_source_after: bool,
    pub deletion_mode: DeletionMode,
    /// Gate on `delete_source_after`: deletion never fires without this.
    pub deletion_confirmed: bool,
    /// One-shot skip, cleared by the supervisor after being honored once.
    pub skip_deletion_this_run: bool,
    pub verification_mode: VerificationMode,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            bandwidth_limit: 0,
            delete_source_after: false,
            deletion_mode: DeletionMode::VerifyThenDelete,
            deletion_confirmed: false,
            skip_deletion_this_run: false,
            verification_mode: VerificationMode::default(),
        }
    }
}

impl JobSettings {
    /// Effective deletion gate per §4.2 pre-flight: all three must hold.
    pub fn should_delete(&self) -> bool {
        self.delete_source_after && self.deletion_confirmed && !self.skip_deletion_this_run
    }
}

/// Live progress snapshot owned by the transfer engine adapter and released
/// to the supervisor by value (§3 ownership model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// 0..=100.
    pub percent: u8,
    pub speed_bytes: u64,
    pub eta_seconds: u64,
    pub status_detail: String,
    pub verification: Option<VerificationState>,
    pub deletion: Option<DeletionState>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            bytes_transferred: 0,
            total_bytes: 0,
            percent: 0,
            speed_bytes: 0,
            eta_seconds: 0,
            status_detail: String::new(),
            verification: None,
            deletion: None,
        }
    }
}

impl Progress {
    /// Merge a partial parser update into `self`. Never clears an
    /// already-populated field (§4.1: "partial or unreadable lines must
    /// never clear an already-populated field").
    pub fn merge(&mut self, delta: ProgressDelta) {
        if let Some(v) = delta.bytes_transferred {
            self.bytes_transferred = v;
        }
        if let Some(v) = delta.total_bytes {
            self.total_bytes = v;
        }
        if let Some(v) = delta.percent {
            self.percent = v.min(100);
        }
        if let Some(v) = delta.speed_bytes {
            self.speed_bytes = v;
        }
        if let Some(v) = delta.eta_seconds {
            self.eta_seconds = v;
        }
    }
}

/// A partial progress update extracted from one output line/chunk. `None`
/// fields were not present in that line and must not overwrite existing
/// state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressDelta {
    pub bytes_transferred: Option<u64>,
    pub total_bytes: Option<u64>,
    pub percent: Option<u8>,
    pub speed_bytes: Option<u64>,
    pub eta_seconds: Option<u64>,
}

/// A backup job (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub source: String,
    pub dest: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: Progress,
    pub settings: JobSettings,
    pub created_at_epoch_ms: u64,
    pub updated_at_epoch_ms: u64,
    pub version: u64,
}

impl Job {
    pub fn new(
        name: String,
        source: String,
        dest: String,
        job_type: JobType,
        settings: JobSettings,
        now_epoch_ms: u64,
    ) -> Self {
        let mut progress = Progress::default();
        progress.verification = Some(if settings.verification_mode != VerificationMode::Fast {
            VerificationState::enabled()
        } else {
            VerificationState::disabled()
        });
        progress.deletion = Some(if settings.delete_source_after {
            DeletionState::new(settings.deletion_mode)
        } else {
            DeletionState::disabled()
        });

        Self {
            id: JobId::new(),
            name,
            source,
            dest,
            job_type,
            status: JobStatus::Pending,
            progress,
            settings,
            created_at_epoch_ms: now_epoch_ms,
            updated_at_epoch_ms: now_epoch_ms,
            version: 0,
        }
    }

    /// Bump `version` and `updated_at`; called on every progress or status
    /// mutation per §3 ("version ... incremented on every progress or
    /// status mutation").
    pub fn touch(&mut self, now_epoch_ms: u64) {
        self.version += 1;
        self.updated_at_epoch_ms = now_epoch_ms;
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder::new(name.into())
    }
}

/// Test-only builder for [`Job`] (kept outside the `builder!` macro since
/// `Job::new` already seeds the progress sub-blocks from settings).
#[cfg(any(test, feature = "test-support"))]
pub struct JobBuilder {
    name: String,
    source: String,
    dest: String,
    job_type: JobType,
    settings: JobSettings,
    now_epoch_ms: u64,
}

#[cfg(any(test, feature = "test-support"))]
impl JobBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            source: "/tmp/src".to_string(),
            dest: "/tmp/dst".to_string(),
            job_type: JobType::LocalCopy,
            settings: JobSettings::default(),
            now_epoch_ms: 1_000_000,
        }
    }

    pub fn source(mut self, v: impl Into<String>) -> Self {
        self.source = v.into();
        self
    }

    pub fn dest(mut self, v: impl Into<String>) -> Self {
        self.dest = v.into();
        self
    }

    pub fn job_type(mut self, v: JobType) -> Self {
        self.job_type = v;
        self
    }

    pub fn settings(mut self, v: JobSettings) -> Self {
        self.settings = v;
        self
    }

    pub fn build(self) -> Job {
        Job::new(self.name, self.source, self.dest, self.job_type, self.settings, self.now_epoch_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_pending_at_version_zero() {
        let job = Job::new(
            "nightly".into(),
            "/tmp/src".into(),
            "/tmp/dst".into(),
            JobType::LocalCopy,
            JobSettings::default(),
            1000,
        );
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.version, 0);
        assert_eq!(job.progress.percent, 0);
    }

    #[test]
    fn touch_bumps_version_monotonically() {
        let mut job = Job::new(
            "nightly".into(),
            "/tmp/src".into(),
            "/tmp/dst".into(),
            JobType::LocalCopy,
            JobSettings::default(),
            1000,
        );
        job.touch(1001);
        job.touch(1002);
        assert_eq!(job.version, 2);
        assert_eq!(job.updated_at_epoch_ms, 1002);
    }

    #[test]
    fn status_transition_guards() {
        assert!(JobStatus::Pending.can_start());
        assert!(JobStatus::Paused.can_start());
        assert!(JobStatus::Failed.can_start());
        assert!(!JobStatus::Running.can_start());
        assert!(!JobStatus::Completed.can_start());

        assert!(JobStatus::Running.can_stop());
        assert!(!JobStatus::Pending.can_stop());
    }

    #[test]
    fn should_delete_requires_all_three_gates() {
        let mut s = JobSettings { delete_source_after: true, ..Default::default() };
        assert!(!s.should_delete(), "not confirmed yet");
        s.deletion_confirmed = true;
        assert!(s.should_delete());
        s.skip_deletion_this_run = true;
        assert!(!s.should_delete(), "one-shot skip wins");
    }

    #[test]
    fn progress_merge_never_clears_populated_fields() {
        let mut p = Progress::default();
        p.merge(ProgressDelta { percent: Some(42), bytes_transferred: Some(100), ..Default::default() });
        assert_eq!(p.percent, 42);
        assert_eq!(p.bytes_transferred, 100);

        // A later delta that only carries speed must not clear percent/bytes.
        p.merge(ProgressDelta { speed_bytes: Some(999), ..Default::default() });
        assert_eq!(p.percent, 42);
        assert_eq!(p.bytes_transferred, 100);
        assert_eq!(p.speed_bytes, 999);
    }

    #[test]
    fn progress_merge_caps_percent_at_100() {
        let mut p = Progress::default();
        p.merge(ProgressDelta { percent: Some(101), ..Default::default() });
        assert_eq!(p.percent, 100);
    }

    #[test]
    fn unknown_settings_keys_are_rejected() {
        let json = r#"{"bandwidth_limit": 0, "bogus_key": true}"#;
        let result: Result<JobSettings, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
