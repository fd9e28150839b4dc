// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable job catalog (C3).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bku_core::{Clock, ErrorEvent, Job, JobId, Severity, SystemClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::atomic;
use crate::error::StorageError;

/// Handle other components can install to learn about persistence
/// failures this store can't report on its own (it has no dependency on
/// the daemon's error log).
type ErrorReporter = Arc<Mutex<Option<Arc<dyn Fn(ErrorEvent) + Send + Sync>>>>;

#[derive(Debug, Serialize)]
struct WriteDoc<'a> {
    jobs: &'a [Job],
}

/// Shape used for reads: `jobs` is kept as raw values so a single
/// malformed record doesn't invalidate the whole file (§4.3: "per-record
/// decode errors cause that record to be skipped, not the whole file").
#[derive(Debug, Deserialize)]
struct ReadDoc {
    jobs: Vec<serde_json::Value>,
}

enum WriteMsg {
    Write(Vec<Job>),
    Flush(oneshot::Sender<()>),
}

/// Durable, crash-safe catalog of [`Job`] records (§4.3).
///
/// Reads go straight to disk, synchronously. Writes are handed to a
/// single background task over an unbounded channel so concurrent
/// callers never race on the underlying file; [`JobStore::flush`] (and
/// [`JobStore::shutdown`]) wait for the queue to drain.
pub struct JobStore {
    jobs_path: PathBuf,
    tx: mpsc::UnboundedSender<WriteMsg>,
    writer: Mutex<Option<JoinHandle<()>>>,
    error_reporter: ErrorReporter,
}

impl JobStore {
    /// Open (creating if absent) the job store at `<data_dir>/jobs.json`.
    pub async fn open(data_dir: &Path) -> Result<Self, StorageError> {
        let jobs_path = bku_core::paths::jobs_file(data_dir);
        if !jobs_path.exists() {
            atomic::write_json(&jobs_path, &WriteDoc { jobs: &[] }, "job_store").await?;
        }

        let error_reporter: ErrorReporter = Arc::new(Mutex::new(None));
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_path = jobs_path.clone();
        let writer = tokio::spawn(Self::run_writer(writer_path, rx, error_reporter.clone()));

        Ok(Self { jobs_path, tx, writer: Mutex::new(Some(writer)), error_reporter })
    }

    /// Install a callback invoked with a Medium or Critical [`ErrorEvent`]
    /// whenever the store's background writer or its corruption-recovery
    /// read path hits an unrecoverable failure. Not available until the
    /// caller's own error log exists, so persistence failures during
    /// startup are logged but not reported.
    pub fn set_error_reporter(&self, reporter: Arc<dyn Fn(ErrorEvent) + Send + Sync>) {
        *self.error_reporter.lock() = Some(reporter);
    }

    fn report(reporter: &ErrorReporter, event: ErrorEvent) {
        if let Some(report) = reporter.lock().clone() {
            report(event);
        }
    }

    async fn run_writer(path: PathBuf, mut rx: mpsc::UnboundedReceiver<WriteMsg>, error_reporter: ErrorReporter) {
        while let Some(msg) = rx.recv().await {
            match msg {
                WriteMsg::Write(jobs) => {
                    if let Err(err) = atomic::write_json(&path, &WriteDoc { jobs: &jobs }, "job_store").await {
                        tracing::error!(%err, "failed to persist job store after retries");
                        let event = ErrorEvent::from_error(&err, "StorageError", Severity::Medium, "job_store", SystemClock.epoch_ms())
                            .with_details("job store write exhausted its retry budget");
                        Self::report(&error_reporter, event);
                    }
                }
                WriteMsg::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
    }

    /// Block until every write enqueued before this call has committed.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriteMsg::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        Ok(())
    }

    /// Drain the write queue and stop the background writer. After this
    /// call the store can still service reads but no further writes.
    pub async fn shutdown(&self) {
        self.flush().await.ok();
        if let Some(handle) = self.writer.lock().take() {
            handle.abort();
        }
    }

    fn load_all_sync(&self) -> Vec<Job> {
        let reporter = &self.error_reporter;
        let doc: ReadDoc =
            atomic::read_json_with_recovery(&self.jobs_path, || ReadDoc { jobs: vec![] }, |event| Self::report(reporter, event));
        doc.jobs
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<Job>(value.clone()) {
                Ok(job) => Some(job),
                Err(err) => {
                    let id = value.get("id").and_then(|v| v.as_str()).unwrap_or("unknown");
                    tracing::error!(job_id = id, %err, "skipping corrupt job record");
                    None
                }
            })
            .collect()
    }

    pub fn load_all(&self) -> Vec<Job> {
        self.load_all_sync()
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.load_all_sync().into_iter().find(|j| j.id == *id)
    }

    pub fn count(&self) -> usize {
        self.load_all_sync().len()
    }

    /// Insert or replace the record for `job.id`.
    pub fn save(&self, job: Job) {
        let mut jobs = self.load_all_sync();
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(slot) => *slot = job,
            None => jobs.push(job),
        }
        let _ = self.tx.send(WriteMsg::Write(jobs));
    }

    /// Replace an existing record; `false` if `job.id` is not present.
    pub fn update(&self, job: Job) -> bool {
        let mut jobs = self.load_all_sync();
        let Some(slot) = jobs.iter_mut().find(|j| j.id == job.id) else {
            return false;
        };
        *slot = job;
        let _ = self.tx.send(WriteMsg::Write(jobs));
        true
    }

    pub fn delete(&self, id: &JobId) -> bool {
        let mut jobs = self.load_all_sync();
        let before = jobs.len();
        jobs.retain(|j| j.id != *id);
        if jobs.len() == before {
            return false;
        }
        let _ = self.tx.send(WriteMsg::Write(jobs));
        true
    }

    pub fn clear(&self) {
        let _ = self.tx.send(WriteMsg::Write(Vec::new()));
    }
}
