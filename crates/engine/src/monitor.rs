// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event Monitor (§4.5): the single long-lived task that drives progress
//! persistence, detects terminal status transitions exactly once, and
//! fans updates out via an [`EventSink`] (implemented by the subscriber
//! fan-out in `bku-daemon`, §4.6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bku_core::{Clock, ErrorEvent, Job, JobId, JobStatus, Severity, SystemClock};

use crate::supervisor::Supervisor;

/// Severity level carried on a `notification` fan-out message (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Success,
}

bku_core::simple_display! {
    NotificationLevel {
        Info => "info",
        Warning => "warning",
        Error => "error",
        Success => "success",
    }
}

/// Destination for the monitor's fan-out messages. Implemented by the
/// subscriber broadcaster (C6) so this crate never has to know about
/// individual subscriber channels.
pub trait EventSink: Send + Sync {
    fn job_update(&self, job: &Job);
    fn job_final_update(&self, job: &Job);
    fn notification(&self, level: NotificationLevel, message: &str, details: Option<&str>);
}

/// A sink that discards everything; useful for running the monitor
/// headless (tests, or a daemon mode with no attached subscribers yet).
pub struct NullSink;
impl EventSink for NullSink {
    fn job_update(&self, _job: &Job) {}
    fn job_final_update(&self, _job: &Job) {}
    fn notification(&self, _level: NotificationLevel, _message: &str, _details: Option<&str>) {}
}

/// How many monitor cycles between opportunistic `cleanup_stopped_engines`
/// calls (§4.5: "every tenth cycle").
const CLEANUP_EVERY_N_CYCLES: u64 = 10;
const ACTIVE_SLEEP: Duration = Duration::from_secs(1);
const IDLE_SLEEP: Duration = Duration::from_secs(5);

/// Drives one monitor cycle: refresh every running job, detect status
/// transitions against `previous_status`, and fan out the corresponding
/// messages. Returns whether any job was running this cycle (determines
/// the sleep duration the caller should use).
pub fn run_cycle<C: Clock>(
    supervisor: &Supervisor<C>,
    sink: &dyn EventSink,
    previous_status: &mut HashMap<JobId, JobStatus>,
    error_log: &dyn Fn(ErrorEvent),
) -> bool {
    let jobs = supervisor.list_jobs();
    let running_jobs: Vec<Job> = jobs.iter().filter(|j| j.status == JobStatus::Running).cloned().collect();
    let running_ids: Vec<JobId> = running_jobs.iter().map(|j| j.id.clone()).collect();

    for job in &running_jobs {
        if let Err(err) = supervisor.update_job_from_engine(&job.id) {
            tracing::error!(job_id = %job.id, %err, "event monitor failed to refresh job from engine");
            let event = ErrorEvent::from_error(&err, "SupervisorError", Severity::High, "event_monitor", supervisor.epoch_ms())
                .with_job(job.id.clone(), job.name.clone());
            error_log(event);
            sink.notification(NotificationLevel::Warning, "degraded: failed to refresh a running job", Some(&err.to_string()));
        }
    }

    let jobs = supervisor.list_jobs();
    for job in &jobs {
        let prev = previous_status.get(&job.id).copied();
        if prev == Some(job.status) {
            continue;
        }

        if job.status == JobStatus::Running {
            sink.job_update(job);
        } else if prev == Some(JobStatus::Running)
            && matches!(job.status, JobStatus::Completed | JobStatus::Failed | JobStatus::Paused)
        {
            if job.status == JobStatus::Failed {
                let event = ErrorEvent::from_error(&"transfer retries exhausted", "TransferFailed", Severity::Medium, "engine", supervisor.epoch_ms())
                    .with_job(job.id.clone(), job.name.clone());
                error_log(event);
            }
            sink.job_final_update(job);
        }
        previous_status.insert(job.id.clone(), job.status);
    }

    // Jobs that vanished (deleted between cycles) no longer need tracking.
    let live_ids: std::collections::HashSet<JobId> = jobs.iter().map(|j| j.id.clone()).collect();
    previous_status.retain(|id, _| live_ids.contains(id));

    !running_ids.is_empty()
}

/// Run the monitor loop forever (or until `shutdown` resolves). Intended
/// to be spawned as its own task by the daemon runtime (§4.11).
pub async fn run_loop<C: Clock>(
    supervisor: Arc<Supervisor<C>>,
    sink: Arc<dyn EventSink>,
    error_log: Arc<dyn Fn(ErrorEvent) + Send + Sync>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut previous_status: HashMap<JobId, JobStatus> = HashMap::new();
    let mut cycle: u64 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let any_running = run_cycle(&supervisor, sink.as_ref(), &mut previous_status, error_log.as_ref());

        cycle += 1;
        if cycle % CLEANUP_EVERY_N_CYCLES == 0 {
            supervisor.cleanup_stopped_engines();
        }

        let sleep_for = if any_running { ACTIVE_SLEEP } else { IDLE_SLEEP };
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bku_core::{test_support::job_with_id, FakeClock};
    use bku_storage::{JobStore, SettingsStore};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<JobId>>,
        finals: Mutex<Vec<JobId>>,
    }

    impl EventSink for RecordingSink {
        fn job_update(&self, job: &Job) {
            self.updates.lock().push(job.id.clone());
        }
        fn job_final_update(&self, job: &Job) {
            self.finals.lock().push(job.id.clone());
        }
        fn notification(&self, _level: NotificationLevel, _message: &str, _details: Option<&str>) {}
    }

    async fn supervisor_with_job(status: JobStatus) -> (Supervisor<FakeClock>, JobId, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open(dir.path()).await.unwrap());
        let settings = Arc::new(SettingsStore::open(dir.path()).await.unwrap());
        let supervisor = Supervisor::with_clock(store, settings, dir.path().to_path_buf(), FakeClock::new());
        let mut job = job_with_id("job-1", "nightly");
        job.status = status;
        supervisor.store().save(job.clone());
        supervisor.store().flush().await.unwrap();
        (supervisor, job.id, dir)
    }

    #[tokio::test]
    async fn running_job_emits_job_update_on_first_sighting() {
        let (supervisor, id, _dir) = supervisor_with_job(JobStatus::Running).await;
        let sink = RecordingSink::default();
        let mut previous = HashMap::new();

        run_cycle(&supervisor, &sink, &mut previous, &|_| {});

        assert_eq!(sink.updates.lock().as_slice(), &[id]);
        assert!(sink.finals.lock().is_empty());
    }

    #[tokio::test]
    async fn completed_transition_emits_final_update_exactly_once() {
        let (supervisor, id, _dir) = supervisor_with_job(JobStatus::Running).await;
        let sink = RecordingSink::default();
        let mut previous = HashMap::new();
        previous.insert(id.clone(), JobStatus::Running);

        let mut job = supervisor.store().get(&id).unwrap();
        job.status = JobStatus::Completed;
        supervisor.store().update(job);
        supervisor.store().flush().await.unwrap();

        run_cycle(&supervisor, &sink, &mut previous, &|_| {});
        run_cycle(&supervisor, &sink, &mut previous, &|_| {});

        assert_eq!(sink.finals.lock().as_slice(), &[id], "final update fires exactly once across repeated cycles");
    }

    #[tokio::test]
    async fn failed_transition_logs_medium_error_event() {
        let (supervisor, id, _dir) = supervisor_with_job(JobStatus::Running).await;
        let sink = RecordingSink::default();
        let mut previous = HashMap::new();
        previous.insert(id.clone(), JobStatus::Running);

        let mut job = supervisor.store().get(&id).unwrap();
        job.status = JobStatus::Failed;
        supervisor.store().update(job);
        supervisor.store().flush().await.unwrap();

        let logged: Arc<Mutex<Vec<ErrorEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_events = logged.clone();
        run_cycle(&supervisor, &sink, &mut previous, &|event| sink_events.lock().push(event));

        let events = logged.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Medium);
        assert_eq!(events[0].component, "engine");
        assert_eq!(events[0].job_id.as_ref(), Some(&id));
    }

    #[tokio::test]
    async fn pending_job_does_not_trigger_either_message() {
        let (supervisor, _id, _dir) = supervisor_with_job(JobStatus::Pending).await;
        let sink = RecordingSink::default();
        let mut previous = HashMap::new();

        run_cycle(&supervisor, &sink, &mut previous, &|_| {});

        assert!(sink.updates.lock().is_empty());
        assert!(sink.finals.lock().is_empty());
    }
}
