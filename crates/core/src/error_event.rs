// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error event catalog types (C7).

use serde::{Deserialize, Serialize};

use crate::job::JobId;

crate::define_id! {
    /// Unique identifier for a logged error event.
    pub struct ErrorEventId("err-");
}

/// Severity assigned by the component that raised the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

crate::simple_display! {
    Severity {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

/// A single recorded error, keyed by job and indexed by severity (§4.7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub id: ErrorEventId,
    pub timestamp_epoch_ms: u64,
    pub severity: Severity,
    pub component: String,
    /// Short symbolic type tag, e.g. the error's enum variant name.
    pub error_type: String,
    pub message: String,
    pub details: Option<String>,
    pub job_id: Option<JobId>,
    pub job_name: Option<String>,
    pub stack_trace: Option<String>,
    pub resolved: bool,
    pub resolved_at_epoch_ms: Option<u64>,
}

impl ErrorEvent {
    /// Canonical construction path: captures `err`'s `Display` as the
    /// message, a short type tag, and a backtrace when `RUST_BACKTRACE`
    /// is set (Rust has no portable runtime stack trace otherwise).
    pub fn from_error<E: std::fmt::Display>(
        err: &E,
        error_type: impl Into<String>,
        severity: Severity,
        component: impl Into<String>,
        now_epoch_ms: u64,
    ) -> Self {
        let stack_trace = if std::env::var_os("RUST_BACKTRACE").is_some() {
            Some(std::backtrace::Backtrace::force_capture().to_string())
        } else {
            None
        };
        Self {
            id: ErrorEventId::new(),
            timestamp_epoch_ms: now_epoch_ms,
            severity,
            component: component.into(),
            error_type: error_type.into(),
            message: err.to_string(),
            details: None,
            job_id: None,
            job_name: None,
            stack_trace,
            resolved: false,
            resolved_at_epoch_ms: None,
        }
    }

    pub fn with_job(mut self, job_id: JobId, job_name: impl Into<String>) -> Self {
        self.job_id = Some(job_id);
        self.job_name = Some(job_name.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn mark_resolved(&mut self, now_epoch_ms: u64) {
        self.resolved = true;
        self.resolved_at_epoch_ms = Some(now_epoch_ms);
    }
}

/// Aggregate counters returned by the error log's `stats()` query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total: usize,
    pub unresolved: usize,
    pub resolved: usize,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
    pub recent_24h: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn from_error_captures_message_and_defaults_unresolved() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let ev = ErrorEvent::from_error(&err, "IoError", Severity::High, "job_store", 42);
        assert!(ev.job_id.is_none());
        assert_eq!(ev.severity, Severity::High);
        assert_eq!(ev.message, "disk full");
        assert!(!ev.resolved);
        assert!(ev.resolved_at_epoch_ms.is_none());
    }

    #[test]
    fn with_job_attaches_job_context() {
        let err = "boom";
        let ev = ErrorEvent::from_error(&err, "Custom", Severity::Medium, "engine", 1)
            .with_job(JobId::from_string("job-abc"), "nightly");
        assert_eq!(ev.job_name.as_deref(), Some("nightly"));
    }

    #[test]
    fn mark_resolved_sets_timestamp() {
        let err = "boom";
        let mut ev = ErrorEvent::from_error(&err, "Custom", Severity::Low, "engine", 1);
        ev.mark_resolved(99);
        assert!(ev.resolved);
        assert_eq!(ev.resolved_at_epoch_ms, Some(99));
    }
}
