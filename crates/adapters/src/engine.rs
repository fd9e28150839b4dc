// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic transfer engine driver shared by the rsync and rclone
//! adapters (§4.1): one background task per engine reads the child's
//! output, merges progress deltas under a mutex, classifies
//! termination, and drives the retry/backoff state machine. The
//! tool-specific pieces (command construction, line parsing, exit
//! classification) are supplied by a [`ToolDriver`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bku_core::{Backoff, DeletionMode, DeletionPhase, Job, JobId, Progress, VerificationMode};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::Notify;

use crate::deletion::{self, DeletionOutcome, VerifyThenDeleteTarget};
use crate::error::AdapterError;
use crate::termination::TerminationClass;

/// Tail-line ring buffer capacity used for pattern-based exit
/// disambiguation (§4.1: "checked against the last 50 captured lines").
const TAIL_CAPACITY: usize = 50;

/// Bounded number of trailing output lines drained after `stop()` asks
/// the child to terminate, so the final progress snapshot reflects
/// whatever the tool printed on its way out.
const STOP_DRAIN_LINES: u32 = 10;

/// How long `stop()` waits for a polite exit before force-killing.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Public contract for a transfer engine adapter (§4.1).
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Launch the child process. Returns `false` if one is already live.
    async fn start(&self) -> Result<bool, AdapterError>;
    /// Politely stop the child, draining trailing output first.
    async fn stop(&self) -> bool;
    fn is_running(&self) -> bool;
    fn get_progress(&self) -> Progress;
}

/// Everything a concrete tool (rsync, rclone) must supply to plug into
/// the generic [`Engine`] driver.
pub trait ToolDriver: Send + Sync + 'static {
    fn tool_name(&self) -> &'static str;
    fn build_command(&self) -> tokio::process::Command;
    /// Whether progress is emitted on stderr (rclone) rather than
    /// stdout (rsync).
    fn progress_on_stderr(&self) -> bool;
    fn parse_line(&self, line: &str) -> bku_core::ProgressDelta;
    fn classify(&self, exit_code: i32, tail: &[String]) -> TerminationClass;
    /// Build the same command again for a resumed retry attempt.
    fn build_retry_command(&self) -> tokio::process::Command {
        self.build_command()
    }
}

/// State the live monitor task and the `Engine` handle both touch:
/// progress snapshot, tail-line ring buffer for pattern disambiguation,
/// and the running/retry counters.
struct Shared {
    progress: Mutex<Progress>,
    tail: Mutex<VecDeque<String>>,
    running: AtomicBool,
    retry_count: AtomicU32,
    /// pid of the currently-live child, if any; the only thing `stop()`
    /// needs to reach into the monitor task's process.
    child_pid: Mutex<Option<u32>>,
    /// Signaled by the monitor task once it has finished the
    /// terminate/drain/grace/force-kill sequence triggered by `stop()`.
    stopped: Notify,
}

impl Shared {
    fn new(initial: Progress) -> Self {
        Self {
            progress: Mutex::new(initial),
            tail: Mutex::new(VecDeque::with_capacity(TAIL_CAPACITY)),
            running: AtomicBool::new(false),
            retry_count: AtomicU32::new(0),
            child_pid: Mutex::new(None),
            stopped: Notify::new(),
        }
    }

    fn push_tail_line(&self, line: &str) {
        let mut tail = self.tail.lock();
        if tail.len() == TAIL_CAPACITY {
            tail.pop_front();
        }
        tail.push_back(line.to_string());
    }

    fn tail_snapshot(&self) -> Vec<String> {
        self.tail.lock().iter().cloned().collect()
    }
}

/// Send `SIGTERM` to the live child, if one is currently tracked.
/// Best-effort: if the process has already exited, `kill` returning
/// `ESRCH` is not an error worth reporting.
fn send_terminate(shared: &Shared) {
    let Some(pid) = *shared.child_pid.lock() else { return };
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

/// What a transfer engine needs to run the post-transfer deletion pass
/// (§4.2) once the underlying tool reports success. `None` when the job
/// has no source-deletion configured.
#[derive(Clone)]
pub struct DeletionSpec {
    pub source: PathBuf,
    pub mode: DeletionMode,
    pub audit_log_path: PathBuf,
    /// `None` disables `VerifyThenDelete` for this run (e.g. no verify
    /// target is available for the destination kind); the phase is then
    /// reported as `Failed` without touching the source.
    pub verify_target: Option<Arc<dyn VerifyThenDeleteTarget>>,
}

/// Generic engine: one instance per job, parameterized over the tool
/// driver that supplies the rsync/rclone-specific behavior.
pub struct Engine<D: ToolDriver> {
    driver: Arc<D>,
    job_id: JobId,
    max_retries: u32,
    backoff: Backoff,
    shared: Arc<Shared>,
    log_path: PathBuf,
    deletion: Option<DeletionSpec>,
}

impl<D: ToolDriver> Engine<D> {
    pub fn new(
        driver: D,
        job_id: JobId,
        max_retries: u32,
        initial_progress: Progress,
        log_path: PathBuf,
        deletion: Option<DeletionSpec>,
    ) -> Self {
        Self {
            driver: Arc::new(driver),
            job_id,
            max_retries,
            backoff: Backoff::default(),
            shared: Arc::new(Shared::new(initial_progress)),
            log_path,
            deletion,
        }
    }

    fn spawn_child(&self) -> Result<Child, AdapterError> {
        spawn_with_driver(self.driver.as_ref())
    }
}

fn spawn_with_driver<D: ToolDriver>(driver: &D) -> Result<Child, AdapterError> {
    let tool = driver.tool_name();
    let mut cmd = driver.build_command();
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.spawn().map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            AdapterError::ToolNotInstalled { tool }
        } else {
            AdapterError::SpawnFailed { tool, source }
        }
    })
}

#[async_trait]
impl<D: ToolDriver> TransferEngine for Engine<D> {
    async fn start(&self) -> Result<bool, AdapterError> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let child = self.spawn_child()?;
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.retry_count.store(0, Ordering::SeqCst);
        self.shared.tail.lock().clear();
        {
            let mut progress = self.shared.progress.lock();
            progress.status_detail = "running".to_string();
            if let Some(deletion) = progress.deletion.as_mut() {
                deletion.phase = DeletionPhase::Transfer;
            }
        }

        let driver = self.driver.clone();
        let shared = self.shared.clone();
        let job_id = self.job_id.clone();
        let log_path = self.log_path.clone();
        let max_retries = self.max_retries;
        let backoff = self.backoff;
        let deletion = self.deletion.clone();

        // The monitor task owns the spawned child for the entire run,
        // including restarts across retries; `stop()` only ever reaches
        // in through `shared.child_pid` and the `running` flag.
        tokio::spawn(async move {
            run_monitor(driver.as_ref(), shared, &job_id, &log_path, max_retries, backoff, child, deletion).await;
        });

        Ok(true)
    }

    async fn stop(&self) -> bool {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return false;
        }

        send_terminate(&self.shared);
        self.shared.stopped.notified().await;
        true
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn get_progress(&self) -> Progress {
        self.shared.progress.lock().clone()
    }
}

/// Drives one child process to completion, retrying transient network
/// failures with backoff, and reporting the final [`TerminationClass`].
/// Generic over `D` so both tools share one implementation.
async fn run_monitor<D: ToolDriver>(
    driver: &D,
    shared: Arc<Shared>,
    job_id: &JobId,
    log_path: &std::path::Path,
    max_retries: u32,
    backoff: Backoff,
    mut child: Child,
    deletion: Option<DeletionSpec>,
) -> TerminationClass {
    loop {
        let progress_reader = if driver.progress_on_stderr() { child.stderr.take() } else { child.stdout.take() };
        *shared.child_pid.lock() = child.id();
        if !shared.running.load(Ordering::SeqCst) {
            // `stop()` already flipped the flag before this attempt's pid
            // became visible to it; send the signal ourselves so the
            // request isn't lost.
            send_terminate(&shared);
        }

        if let Some(reader) = progress_reader {
            let mut lines = BufReader::new(reader).lines();
            let mut drained_after_stop = 0u32;
            while let Ok(Some(line)) = lines.next_line().await {
                apply_line(driver, &shared, &line);
                write_log_line(log_path, &line).await;
                shared.push_tail_line(&line.to_lowercase());

                if !shared.running.load(Ordering::SeqCst) {
                    drained_after_stop += 1;
                    if drained_after_stop >= STOP_DRAIN_LINES {
                        break;
                    }
                }
            }
        }

        if !shared.running.load(Ordering::SeqCst) {
            match tokio::time::timeout(STOP_GRACE_PERIOD, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
            *shared.child_pid.lock() = None;
            shared.progress.lock().status_detail = "paused".to_string();
            shared.stopped.notify_one();
            return TerminationClass::Fatal;
        }

        let status = child.wait().await;
        let exit_code = match status {
            Ok(s) => s.code().unwrap_or(-1),
            Err(err) => {
                tracing::error!(job_id = %job_id, %err, "io error waiting on transfer child");
                shared.running.store(false, Ordering::SeqCst);
                *shared.child_pid.lock() = None;
                return TerminationClass::Fatal;
            }
        };

        *shared.child_pid.lock() = None;
        let class = driver.classify(exit_code, &shared.tail_snapshot());
        match class {
            TerminationClass::Completed => {
                shared.running.store(false, Ordering::SeqCst);
                {
                    let mut progress = shared.progress.lock();
                    progress.percent = 100;
                    progress.status_detail = "completed".to_string();
                }
                if let Some(spec) = &deletion {
                    run_deletion_pipeline(spec, &shared).await;
                }
                return class;
            }
            TerminationClass::Fatal => {
                shared.running.store(false, Ordering::SeqCst);
                let mut progress = shared.progress.lock();
                progress.status_detail = "failed".to_string();
                return class;
            }
            TerminationClass::TransientNetwork => {
                let attempt = shared.retry_count.fetch_add(1, Ordering::SeqCst);
                if attempt >= max_retries || !shared.running.load(Ordering::SeqCst) {
                    shared.running.store(false, Ordering::SeqCst);
                    let mut progress = shared.progress.lock();
                    progress.status_detail = "failed".to_string();
                    return TerminationClass::Fatal;
                }

                {
                    let mut progress = shared.progress.lock();
                    progress.status_detail = "running (retrying...)".to_string();
                }
                tracing::warn!(job_id = %job_id, tool = driver.tool_name(), attempt, "retrying after transient error");
                tokio::time::sleep(backoff.delay(attempt)).await;
                if !shared.running.load(Ordering::SeqCst) {
                    return TerminationClass::Fatal;
                }

                shared.tail.lock().clear();
                let mut retry_cmd = driver.build_retry_command();
                retry_cmd.stdin(std::process::Stdio::null());
                retry_cmd.stdout(std::process::Stdio::piped());
                retry_cmd.stderr(std::process::Stdio::piped());
                match retry_cmd.spawn() {
                    Ok(new_child) => {
                        child = new_child;
                        continue;
                    }
                    Err(err) => {
                        tracing::error!(job_id = %job_id, %err, "failed to restart transfer process");
                        shared.running.store(false, Ordering::SeqCst);
                        *shared.child_pid.lock() = None;
                        let mut progress = shared.progress.lock();
                        progress.status_detail = "failed".to_string();
                        return TerminationClass::Fatal;
                    }
                }
            }
        }
    }
}

/// Run the post-transfer deletion pass (§4.2) once the child has
/// reported a clean exit, mirroring phase/count transitions onto the
/// live progress snapshot as they happen.
async fn run_deletion_pipeline(spec: &DeletionSpec, shared: &Shared) {
    match spec.mode {
        DeletionMode::PerFile => {
            set_deletion_phase(shared, DeletionPhase::Deleting);
            let estimated_files = deletion::count_files(&spec.source).await;
            let outcome = deletion::run_per_file_cleanup(&spec.source, spec.audit_log_path.clone(), estimated_files).await;
            apply_deletion_outcome(shared, &outcome);
        }
        DeletionMode::VerifyThenDelete => {
            let Some(target) = spec.verify_target.as_ref() else {
                set_deletion_phase(shared, DeletionPhase::Failed);
                return;
            };
            let estimated_files = deletion::count_files(&spec.source).await;
            let mut on_phase = |phase: DeletionPhase| set_deletion_phase(shared, phase);
            let (outcome, verify_result) = deletion::run_verify_then_delete_with_phase(
                &spec.source,
                target.as_ref(),
                spec.audit_log_path.clone(),
                estimated_files,
                &mut on_phase,
            )
            .await;

            let mut progress = shared.progress.lock();
            if let Some(verification) = progress.verification.as_mut() {
                verification.passed = verify_result;
                verification.files_checked = estimated_files;
            }
            drop(progress);
            apply_deletion_outcome(shared, &outcome);
        }
    }
}

fn set_deletion_phase(shared: &Shared, phase: DeletionPhase) {
    if let Some(deletion) = shared.progress.lock().deletion.as_mut() {
        deletion.phase = phase;
    }
}

fn apply_deletion_outcome(shared: &Shared, outcome: &DeletionOutcome) {
    if let Some(deletion) = shared.progress.lock().deletion.as_mut() {
        deletion.phase = outcome.phase;
        deletion.files_deleted = outcome.files_deleted;
        deletion.bytes_deleted = outcome.bytes_deleted;
    }
}

fn apply_line<D: ToolDriver>(driver: &D, shared: &Shared, line: &str) {
    let current_total = shared.progress.lock().total_bytes;
    let mut delta = driver.parse_line(line);
    crate::progress_parse::reconcile_total(&mut delta, current_total);
    shared.progress.lock().merge(delta);
}

async fn write_log_line(log_path: &std::path::Path, line: &str) {
    use tokio::io::AsyncWriteExt;
    if let Ok(mut file) = tokio::fs::OpenOptions::new().create(true).append(true).open(log_path).await {
        let _ = file.write_all(format!("{line}\n").as_bytes()).await;
    }
    // A failing per-job transcript write is not fatal to the transfer.
}

/// Seed the initial per-job progress snapshot from settings (mirrors
/// `Job::new`'s sub-block seeding so an engine's first `get_progress()`
/// already carries the right `enabled`/`mode` flags).
pub fn seed_progress(verification_mode: VerificationMode, delete_source_after: bool, deletion_mode: DeletionMode) -> Progress {
    let mut progress = Progress::default();
    progress.verification = Some(if verification_mode != VerificationMode::Fast {
        bku_core::VerificationState::enabled()
    } else {
        bku_core::VerificationState::disabled()
    });
    progress.deletion =
        Some(if delete_source_after { bku_core::DeletionState::new(deletion_mode) } else { bku_core::DeletionState::disabled() });
    progress
}

/// Convenience used by adapters that need the owning job's settings at
/// construction time without pulling in the whole `Job`.
pub fn seed_progress_for_job(job: &Job) -> Progress {
    seed_progress(job.settings.verification_mode, job.settings.delete_source_after, job.settings.deletion_mode)
}
