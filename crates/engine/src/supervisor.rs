// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job Supervisor (§4.4): the single authority over live transfer
//! engines, backed by the durable job store.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bku_adapters::{deletion, new_cloud_copy_adapter, new_local_copy_adapter, TransferEngine};
use bku_core::{Clock, Job, JobId, JobSettings, JobStatus, JobType, SystemClock};
use bku_storage::{JobStore, SettingsStore};
use parking_lot::RwLock;

use crate::error::SupervisorError;

/// §4.4: an engine not seen running for longer than this is reclaimed by
/// `cleanup_stopped_engines`.
const ENGINE_IDLE_GC: Duration = Duration::from_secs(300);

/// §4.4: persist iff 2.0s have elapsed since the last persisted point for
/// this job, or the percent moved by at least 1.
const PROGRESS_THROTTLE_SECS: f64 = 2.0;
const PROGRESS_THROTTLE_PERCENT: u8 = 1;

/// §4.4: list cache freshness window.
const LIST_CACHE_TTL: Duration = Duration::from_secs(1);

struct ListCache {
    jobs: Vec<Job>,
    cached_at: Option<Instant>,
    dirty: bool,
}

impl Default for ListCache {
    fn default() -> Self {
        Self { jobs: Vec::new(), cached_at: None, dirty: true }
    }
}

/// Owns the three maps described in §4.4, protected by `parking_lot`
/// locks held only across short critical sections, never across an
/// `.await`.
pub struct Supervisor<C: Clock = SystemClock> {
    store: Arc<JobStore>,
    settings: Arc<SettingsStore>,
    data_dir: PathBuf,
    clock: C,
    engines: RwLock<HashMap<JobId, Arc<dyn TransferEngine>>>,
    /// Job ids with a `start_job` call in flight, reserved for the
    /// duration between the liveness check and the `engines` insert so
    /// two concurrent starts for the same id can't both win the race.
    starting: RwLock<HashSet<JobId>>,
    last_progress_save: RwLock<HashMap<JobId, (Instant, u8)>>,
    engine_stop_times: RwLock<HashMap<JobId, Instant>>,
    list_cache: RwLock<ListCache>,
}

/// Releases a `starting` reservation on drop, so every `start_job` exit
/// path (including early returns via `?`) frees the slot.
struct StartGuard<'a, C: Clock> {
    supervisor: &'a Supervisor<C>,
    id: JobId,
}

impl<C: Clock> Drop for StartGuard<'_, C> {
    fn drop(&mut self) {
        self.supervisor.starting.write().remove(&self.id);
    }
}

impl Supervisor<SystemClock> {
    pub fn new(store: Arc<JobStore>, settings: Arc<SettingsStore>, data_dir: PathBuf) -> Self {
        Self::with_clock(store, settings, data_dir, SystemClock)
    }
}

impl<C: Clock> Supervisor<C> {
    pub fn with_clock(store: Arc<JobStore>, settings: Arc<SettingsStore>, data_dir: PathBuf, clock: C) -> Self {
        Self {
            store,
            settings,
            data_dir,
            clock,
            engines: RwLock::new(HashMap::new()),
            starting: RwLock::new(HashSet::new()),
            last_progress_save: RwLock::new(HashMap::new()),
            engine_stop_times: RwLock::new(HashMap::new()),
            list_cache: RwLock::new(ListCache::default()),
        }
    }

    /// Crash-recovery scan (§4.4): any job the store still reports as
    /// `Running` is a zombie from a prior crash. Paused, never
    /// auto-resumed.
    pub fn recover_at_startup(&self) {
        for mut job in self.store.load_all() {
            if job.status == JobStatus::Running {
                tracing::warn!(job_id = %job.id, "recovering zombie job from crash, marking paused");
                job.status = JobStatus::Paused;
                job.touch(self.clock.epoch_ms());
                self.store.update(job);
            }
        }
        self.mark_dirty();
    }

    fn mark_dirty(&self) {
        self.list_cache.write().dirty = true;
    }

    pub fn create_job(
        &self,
        name: String,
        source: String,
        dest: String,
        job_type: JobType,
        settings: JobSettings,
    ) -> Result<Job, SupervisorError> {
        if name.trim().is_empty() {
            return Err(SupervisorError::Validation("job name must not be empty".to_string()));
        }
        if source.trim().is_empty() || dest.trim().is_empty() {
            return Err(SupervisorError::Validation("source and dest must not be empty".to_string()));
        }

        let job = Job::new(name, source, dest, job_type, settings, self.clock.epoch_ms());
        self.store.save(job.clone());
        self.mark_dirty();
        Ok(job)
    }

    /// Atomically check-and-reserve `id` against both the live-engine map
    /// and any other in-flight `start_job` call, so the whole sequence up
    /// to the final `engines` insert only ever has one winner.
    fn reserve_start(&self, id: &JobId) -> Result<StartGuard<'_, C>, SupervisorError> {
        let mut starting = self.starting.write();
        if self.engines.read().contains_key(id) || starting.contains(id) {
            return Err(SupervisorError::CannotStart(id.clone()));
        }
        starting.insert(id.clone());
        Ok(StartGuard { supervisor: self, id: id.clone() })
    }

    pub async fn start_job(&self, id: &JobId) -> Result<Job, SupervisorError> {
        let mut job = self.store.get(id).ok_or_else(|| SupervisorError::NotFound(id.clone()))?;
        if !job.status.can_start() {
            return Err(SupervisorError::CannotStart(id.clone()));
        }

        // Reserve the slot before any `.await` so two concurrent calls
        // for the same id can't both pass the liveness check; the guard
        // releases the reservation on every exit path, including `?`.
        let _guard = self.reserve_start(id)?;

        if job.settings.should_delete() {
            let dest_is_local = job.job_type == JobType::LocalCopy;
            match deletion::preflight_check(std::path::Path::new(&job.source), std::path::Path::new(&job.dest), dest_is_local)
                .await
            {
                Ok(Some(warning)) => job.progress.status_detail = warning,
                Ok(None) => {}
                Err(err) => return Err(SupervisorError::Preflight(err)),
            }
        }

        let max_retries = self.settings.current().max_retry_attempts;
        let log_path = bku_core::paths::transfer_log_path(&self.data_dir, &job.job_type.to_string(), job.id.as_str());
        let deletion_log_path = bku_core::paths::deletion_log_path(&self.data_dir, job.id.as_str());

        let adapter: Arc<dyn TransferEngine> = match job.job_type {
            JobType::LocalCopy => Arc::new(
                new_local_copy_adapter(
                    job.id.clone(),
                    PathBuf::from(&job.source),
                    PathBuf::from(&job.dest),
                    job.settings.bandwidth_limit,
                    job.settings.verification_mode,
                    job.settings.delete_source_after,
                    job.settings.deletion_mode,
                    max_retries,
                    log_path,
                    deletion_log_path,
                )
                .await,
            ),
            JobType::CloudCopy => Arc::new(new_cloud_copy_adapter(
                job.id.clone(),
                PathBuf::from(&job.source),
                job.dest.clone(),
                job.settings.bandwidth_limit,
                job.settings.verification_mode,
                job.settings.delete_source_after,
                job.settings.deletion_mode,
                max_retries,
                log_path,
                deletion_log_path,
            )),
        };

        match adapter.start().await {
            Ok(true) => {}
            Ok(false) => return Err(SupervisorError::CannotStart(id.clone())),
            Err(err) => {
                let _ = adapter.stop().await;
                return Err(SupervisorError::Adapter(err));
            }
        }

        self.engines.write().insert(id.clone(), adapter);
        self.last_progress_save.write().insert(id.clone(), (self.clock.now(), 0));
        self.engine_stop_times.write().remove(id);

        job.status = JobStatus::Running;
        job.touch(self.clock.epoch_ms());
        self.store.update(job.clone());
        self.mark_dirty();
        Ok(job)
    }

    pub async fn stop_job(&self, id: &JobId) -> Result<Job, SupervisorError> {
        let adapter = self.engines.read().get(id).cloned().ok_or_else(|| SupervisorError::NotRunning(id.clone()))?;

        adapter.stop().await;
        let final_progress = adapter.get_progress();

        let mut job = self.store.get(id).ok_or_else(|| SupervisorError::NotFound(id.clone()))?;
        job.progress = final_progress;
        job.status = JobStatus::Paused;
        job.touch(self.clock.epoch_ms());
        self.store.update(job.clone());

        self.engines.write().remove(id);
        self.last_progress_save.write().remove(id);
        self.engine_stop_times.write().remove(id);
        self.mark_dirty();
        Ok(job)
    }

    pub fn delete_job(&self, id: &JobId) -> Result<(), SupervisorError> {
        if self.engines.read().contains_key(id) {
            return Err(SupervisorError::LiveEngine(id.clone()));
        }
        if !self.store.delete(id) {
            return Err(SupervisorError::NotFound(id.clone()));
        }
        self.engines.write().remove(id);
        self.last_progress_save.write().remove(id);
        self.engine_stop_times.write().remove(id);
        self.mark_dirty();
        Ok(())
    }

    pub fn get_job_status(&self, id: &JobId) -> Result<Job, SupervisorError> {
        let mut job = self.store.get(id).ok_or_else(|| SupervisorError::NotFound(id.clone()))?;
        if let Some(adapter) = self.engines.read().get(id) {
            job.progress = adapter.get_progress();
        }
        Ok(job)
    }

    fn should_persist_progress(&self, id: &JobId, percent: u8) -> bool {
        let mut tracker = self.last_progress_save.write();
        match tracker.get(id) {
            None => {
                tracker.insert(id.clone(), (self.clock.now(), percent));
                true
            }
            Some(&(last_at, last_percent)) => {
                let elapsed = self.clock.now().saturating_duration_since(last_at);
                let moved = percent.abs_diff(last_percent) >= PROGRESS_THROTTLE_PERCENT;
                if elapsed.as_secs_f64() >= PROGRESS_THROTTLE_SECS || moved {
                    tracker.insert(id.clone(), (self.clock.now(), percent));
                    true
                } else {
                    false
                }
            }
        }
    }

    /// §4.4: the core per-cycle update. Returns the merged `Job` so the
    /// caller (the event monitor) can compare statuses across cycles.
    pub fn update_job_from_engine(&self, id: &JobId) -> Result<Job, SupervisorError> {
        let adapter = self.engines.read().get(id).cloned().ok_or_else(|| SupervisorError::NotRunning(id.clone()))?;

        let mut job = self.store.get(id).ok_or_else(|| SupervisorError::NotFound(id.clone()))?;

        if adapter.is_running() {
            let progress = adapter.get_progress();
            let percent = progress.percent;
            job.progress = progress;
            if self.should_persist_progress(id, percent) {
                job.touch(self.clock.epoch_ms());
                self.store.update(job.clone());
            }
            return Ok(job);
        }

        // Terminal: persist the final progress snapshot first, then the
        // status transition, as two separate writes per §4.4.
        let final_progress = adapter.get_progress();
        job.progress = final_progress.clone();
        job.touch(self.clock.epoch_ms());
        self.store.update(job.clone());

        job.status = if final_progress.status_detail == "completed" { JobStatus::Completed } else { JobStatus::Failed };
        job.touch(self.clock.epoch_ms());
        self.store.update(job.clone());

        self.engines.write().remove(id);
        self.last_progress_save.write().remove(id);
        self.mark_dirty();
        Ok(job)
    }

    /// §4.4: garbage-collect engines that stopped running but were never
    /// explicitly removed (a backstop behind `update_job_from_engine`'s
    /// direct removal on terminal transitions).
    pub fn cleanup_stopped_engines(&self) {
        let stopped: Vec<JobId> =
            self.engines.read().iter().filter(|(_, adapter)| !adapter.is_running()).map(|(id, _)| id.clone()).collect();

        for id in stopped {
            let mut stop_times = self.engine_stop_times.write();
            match stop_times.get(&id) {
                Some(&stopped_at) if self.clock.now().saturating_duration_since(stopped_at) > ENGINE_IDLE_GC => {
                    stop_times.remove(&id);
                    drop(stop_times);
                    self.engines.write().remove(&id);
                    self.last_progress_save.write().remove(&id);
                }
                Some(_) => {}
                None => {
                    stop_times.insert(id, self.clock.now());
                }
            }
        }
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        {
            let cache = self.list_cache.read();
            if !cache.dirty {
                if let Some(cached_at) = cache.cached_at {
                    if self.clock.now().saturating_duration_since(cached_at) <= LIST_CACHE_TTL {
                        return cache.jobs.clone();
                    }
                }
            }
        }

        let ids: Vec<JobId> = self.store.load_all().into_iter().map(|j| j.id).collect();
        let jobs: Vec<Job> = ids.into_iter().filter_map(|id| self.get_job_status(&id).ok()).collect();

        let mut cache = self.list_cache.write();
        cache.jobs = jobs.clone();
        cache.cached_at = Some(self.clock.now());
        cache.dirty = false;
        jobs
    }

    /// Number of engines currently tracked as live (§6 health summary).
    pub fn live_engine_count(&self) -> usize {
        self.engines.read().len()
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn epoch_ms(&self) -> u64 {
        self.clock.epoch_ms()
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bku_core::{test_support::job_with_id, FakeClock};

    async fn new_supervisor() -> (Supervisor<FakeClock>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open(dir.path()).await.unwrap());
        let settings = Arc::new(SettingsStore::open(dir.path()).await.unwrap());
        let supervisor = Supervisor::with_clock(store, settings, dir.path().to_path_buf(), FakeClock::new());
        (supervisor, dir)
    }

    #[tokio::test]
    async fn create_job_persists_and_returns_pending() {
        let (supervisor, _dir) = new_supervisor().await;
        let job = supervisor
            .create_job("nightly".into(), "/tmp/a".into(), "/tmp/b".into(), JobType::LocalCopy, JobSettings::default())
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        supervisor.store().flush().await.unwrap();
        assert!(supervisor.store().get(&job.id).is_some());
    }

    #[tokio::test]
    async fn create_job_rejects_empty_name() {
        let (supervisor, _dir) = new_supervisor().await;
        let result =
            supervisor.create_job("  ".into(), "/tmp/a".into(), "/tmp/b".into(), JobType::LocalCopy, JobSettings::default());
        assert!(matches!(result, Err(SupervisorError::Validation(_))));
    }

    #[tokio::test]
    async fn delete_job_rejects_live_engine() {
        let (supervisor, _dir) = new_supervisor().await;
        let job = job_with_id("job-live", "live");
        supervisor.store().save(job.clone());
        supervisor.store().flush().await.unwrap();
        supervisor.engines.write().insert(job.id.clone(), Arc::new(FakeEngine::default()));

        let result = supervisor.delete_job(&job.id);
        assert!(matches!(result, Err(SupervisorError::LiveEngine(_))));
    }

    #[tokio::test]
    async fn get_job_status_merges_live_progress_when_engine_present() {
        let (supervisor, _dir) = new_supervisor().await;
        let job = job_with_id("job-1", "nightly");
        supervisor.store().save(job.clone());
        supervisor.store().flush().await.unwrap();

        let engine = Arc::new(FakeEngine::default());
        engine.progress.lock().percent = 42;
        supervisor.engines.write().insert(job.id.clone(), engine);

        let status = supervisor.get_job_status(&job.id).unwrap();
        assert_eq!(status.progress.percent, 42);
    }

    #[tokio::test]
    async fn update_job_from_engine_persists_terminal_status_and_drops_engine() {
        let (supervisor, _dir) = new_supervisor().await;
        let mut job = job_with_id("job-1", "nightly");
        job.status = JobStatus::Running;
        supervisor.store().save(job.clone());
        supervisor.store().flush().await.unwrap();

        let engine = Arc::new(FakeEngine::default());
        engine.running.store(false, std::sync::atomic::Ordering::SeqCst);
        engine.progress.lock().status_detail = "completed".to_string();
        engine.progress.lock().percent = 100;
        supervisor.engines.write().insert(job.id.clone(), engine);

        let updated = supervisor.update_job_from_engine(&job.id).unwrap();
        assert_eq!(updated.status, JobStatus::Completed);
        assert!(!supervisor.engines.read().contains_key(&job.id));
    }

    #[tokio::test]
    async fn should_persist_progress_throttles_by_time_and_percent() {
        let (supervisor, _dir) = new_supervisor().await;
        let id = JobId::new();
        assert!(supervisor.should_persist_progress(&id, 10), "first observation always persists");
        assert!(!supervisor.should_persist_progress(&id, 10), "no time elapsed, no percent change");
        assert!(supervisor.should_persist_progress(&id, 11), "1% move forces a persist");
    }

    #[tokio::test]
    async fn list_jobs_cache_is_reused_within_ttl() {
        let (supervisor, _dir) = new_supervisor().await;
        supervisor
            .create_job("a".into(), "/tmp/a".into(), "/tmp/b".into(), JobType::LocalCopy, JobSettings::default())
            .unwrap();
        let first = supervisor.list_jobs();
        assert_eq!(first.len(), 1);

        // A second create marks the cache dirty, so the next call rebuilds.
        supervisor
            .create_job("b".into(), "/tmp/a".into(), "/tmp/b".into(), JobType::LocalCopy, JobSettings::default())
            .unwrap();
        let second = supervisor.list_jobs();
        assert_eq!(second.len(), 2);
    }

    #[derive(Default)]
    struct FakeEngine {
        progress: parking_lot::Mutex<bku_core::Progress>,
        running: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl TransferEngine for FakeEngine {
        async fn start(&self) -> Result<bool, bku_adapters::AdapterError> {
            self.running.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(true)
        }
        async fn stop(&self) -> bool {
            self.running.store(false, std::sync::atomic::Ordering::SeqCst);
            true
        }
        fn is_running(&self) -> bool {
            self.running.load(std::sync::atomic::Ordering::SeqCst)
        }
        fn get_progress(&self) -> bku_core::Progress {
            self.progress.lock().clone()
        }
    }
}
