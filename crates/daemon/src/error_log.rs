// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error Event Log (§4.7): an append-only, in-process catalog of errors
//! with secondary indexes, periodically snapshotted to `errors.json` so
//! unresolved errors survive a restart.

use std::collections::HashMap;

use bku_core::{ErrorEvent, ErrorEventId, ErrorStats, JobId, Severity};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

struct Inner {
    /// Insertion-ordered: iteration order is chronological.
    by_id: IndexMap<ErrorEventId, ErrorEvent>,
    by_severity: HashMap<Severity, Vec<ErrorEventId>>,
    by_component: HashMap<String, Vec<ErrorEventId>>,
    by_job: HashMap<JobId, Vec<ErrorEventId>>,
}

impl Default for Inner {
    fn default() -> Self {
        Self { by_id: IndexMap::new(), by_severity: HashMap::new(), by_component: HashMap::new(), by_job: HashMap::new() }
    }
}

impl Inner {
    fn index(&mut self, event: &ErrorEvent) {
        self.by_severity.entry(event.severity).or_default().push(event.id.clone());
        self.by_component.entry(event.component.clone()).or_default().push(event.id.clone());
        if let Some(job_id) = &event.job_id {
            self.by_job.entry(job_id.clone()).or_default().push(event.id.clone());
        }
    }

    fn reindex_all(&mut self) {
        self.by_severity.clear();
        self.by_component.clear();
        self.by_job.clear();
        let events: Vec<ErrorEvent> = self.by_id.values().cloned().collect();
        for event in &events {
            self.index(event);
        }
    }
}

/// The catalog (§4.7). `RwLock`-protected; all operations are synchronous
/// and O(1) amortized against the secondary indexes.
pub struct ErrorLog {
    inner: RwLock<Inner>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner::default()) }
    }

    /// Rebuild the catalog from a snapshot loaded at startup (§6: "the
    /// in-process indexes are rebuilt from this on load").
    pub fn from_snapshot(snapshot: ErrorLogSnapshot) -> Self {
        let mut inner = Inner::default();
        for event in snapshot.events {
            inner.by_id.insert(event.id.clone(), event);
        }
        inner.reindex_all();
        Self { inner: RwLock::new(inner) }
    }

    pub fn snapshot(&self) -> ErrorLogSnapshot {
        ErrorLogSnapshot { events: self.inner.read().by_id.values().cloned().collect() }
    }

    pub fn log_error(&self, event: ErrorEvent) {
        let mut inner = self.inner.write();
        inner.index(&event);
        inner.by_id.insert(event.id.clone(), event);
    }

    pub fn get(&self, id: &ErrorEventId) -> Option<ErrorEvent> {
        self.inner.read().by_id.get(id).cloned()
    }

    /// Most recent first, optionally filtered by resolved state.
    pub fn recent(&self, limit: usize, resolved: Option<bool>) -> Vec<ErrorEvent> {
        let inner = self.inner.read();
        inner
            .by_id
            .values()
            .rev()
            .filter(|e| match resolved {
                Some(want) => e.resolved == want,
                None => true,
            })
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn by_job(&self, id: &JobId, limit: usize) -> Vec<ErrorEvent> {
        let inner = self.inner.read();
        inner
            .by_job
            .get(id)
            .into_iter()
            .flatten()
            .rev()
            .filter_map(|eid| inner.by_id.get(eid).cloned())
            .take(limit)
            .collect()
    }

    pub fn by_severity(&self, severity: Severity, limit: usize) -> Vec<ErrorEvent> {
        let inner = self.inner.read();
        inner
            .by_severity
            .get(&severity)
            .into_iter()
            .flatten()
            .rev()
            .filter_map(|eid| inner.by_id.get(eid).cloned())
            .take(limit)
            .collect()
    }

    pub fn mark_resolved(&self, id: &ErrorEventId, now_epoch_ms: u64) -> bool {
        let mut inner = self.inner.write();
        match inner.by_id.get_mut(id) {
            Some(event) => {
                event.mark_resolved(now_epoch_ms);
                true
            }
            None => false,
        }
    }

    pub fn stats(&self, now_epoch_ms: u64) -> ErrorStats {
        let inner = self.inner.read();
        let mut stats = ErrorStats::default();
        for event in inner.by_id.values() {
            stats.total += 1;
            if event.resolved {
                stats.resolved += 1;
            } else {
                stats.unresolved += 1;
            }
            match event.severity {
                Severity::Low => stats.low += 1,
                Severity::Medium => stats.medium += 1,
                Severity::High => stats.high += 1,
                Severity::Critical => stats.critical += 1,
            }
            if now_epoch_ms.saturating_sub(event.timestamp_epoch_ms) <= DAY_MS {
                stats.recent_24h += 1;
            }
        }
        stats
    }

    /// Delete events older than `days`. When `resolved_only` is set
    /// (default per §4.7), unresolved errors are kept regardless of age.
    pub fn delete_old(&self, days: u64, resolved_only: bool, now_epoch_ms: u64) -> usize {
        let cutoff_ms = days.saturating_mul(DAY_MS);
        let mut inner = self.inner.write();
        let to_remove: Vec<ErrorEventId> = inner
            .by_id
            .values()
            .filter(|e| now_epoch_ms.saturating_sub(e.timestamp_epoch_ms) > cutoff_ms && (!resolved_only || e.resolved))
            .map(|e| e.id.clone())
            .collect();
        let removed = to_remove.len();
        for id in &to_remove {
            inner.by_id.shift_remove(id);
        }
        inner.reindex_all();
        removed
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk snapshot of the error log (§6: `errors.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorLogSnapshot {
    pub events: Vec<ErrorEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id_seed: &str, severity: Severity, job: Option<&str>, ts: u64) -> ErrorEvent {
        let mut e = ErrorEvent::from_error(&"boom", "TestError", severity, "test", ts);
        e.id = bku_core::ErrorEventId::from_string(id_seed);
        if let Some(job) = job {
            e = e.with_job(JobId::from_string(job), "nightly");
        }
        e
    }

    #[test]
    fn recent_returns_newest_first() {
        let log = ErrorLog::new();
        log.log_error(event("e1", Severity::Low, None, 1));
        log.log_error(event("e2", Severity::Low, None, 2));
        let recent = log.recent(10, None);
        assert_eq!(recent[0].id, bku_core::ErrorEventId::from_string("e2"));
    }

    #[test]
    fn by_job_filters_to_that_job_only() {
        let log = ErrorLog::new();
        log.log_error(event("e1", Severity::Low, Some("job-a"), 1));
        log.log_error(event("e2", Severity::Low, Some("job-b"), 2));
        let results = log.by_job(&JobId::from_string("job-a"), 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, bku_core::ErrorEventId::from_string("e1"));
    }

    #[test]
    fn mark_resolved_updates_stats() {
        let log = ErrorLog::new();
        log.log_error(event("e1", Severity::Critical, None, 1));
        assert_eq!(log.stats(1).unresolved, 1);
        log.mark_resolved(&bku_core::ErrorEventId::from_string("e1"), 99);
        let stats = log.stats(99);
        assert_eq!(stats.unresolved, 0);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.critical, 1);
    }

    #[test]
    fn stats_counts_recent_24h() {
        let log = ErrorLog::new();
        log.log_error(event("old", Severity::Low, None, 0));
        log.log_error(event("new", Severity::Low, None, DAY_MS));
        let stats = log.stats(DAY_MS + DAY_MS);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.recent_24h, 1, "only the second event is within 24h of `now`");
    }

    #[test]
    fn delete_old_keeps_unresolved_by_default() {
        let log = ErrorLog::new();
        log.log_error(event("e1", Severity::Low, None, 0));
        let removed = log.delete_old(1, true, 10 * DAY_MS);
        assert_eq!(removed, 0, "unresolved events are kept when resolved_only is set");
        assert_eq!(log.stats(10 * DAY_MS).total, 1);
    }

    #[test]
    fn delete_old_removes_aged_resolved_events() {
        let log = ErrorLog::new();
        log.log_error(event("e1", Severity::Low, None, 0));
        log.mark_resolved(&bku_core::ErrorEventId::from_string("e1"), 0);
        let removed = log.delete_old(1, true, 10 * DAY_MS);
        assert_eq!(removed, 1);
        assert_eq!(log.stats(10 * DAY_MS).total, 0);
    }

    #[test]
    fn snapshot_round_trips_through_from_snapshot() {
        let log = ErrorLog::new();
        log.log_error(event("e1", Severity::High, Some("job-a"), 5));
        let snap = log.snapshot();
        let restored = ErrorLog::from_snapshot(snap);
        assert_eq!(restored.by_job(&JobId::from_string("job-a"), 10).len(), 1);
    }
}
