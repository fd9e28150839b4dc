// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bku_core::Job;
use serde::{Deserialize, Serialize};

/// Response from daemon to CLI: a structured result with an `ok` flag and
/// a human message (§4.10/§6), carrying request-specific data when
/// relevant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub ok: bool,
    pub message: String,
    pub data: Option<ResponseData>,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into(), data: None }
    }

    pub fn ok_with(message: impl Into<String>, data: ResponseData) -> Self {
        Self { ok: true, message: message.into(), data: Some(data) }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into(), data: None }
    }
}

/// Payload carried on a successful [`Response`]; which variant is expected
/// depends on the originating [`crate::Request`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseData {
    Job { job: Box<Job> },
    Jobs { jobs: Vec<Job> },
    Health(HealthSummary),
}

/// Health summary exposed to the presentation layer (§6): counts of live
/// engines, running jobs, unresolved errors, last-24h errors, and
/// critical-error count.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthSummary {
    pub uptime_secs: u64,
    pub live_engines: usize,
    pub jobs_running: usize,
    pub unresolved_errors: usize,
    pub errors_last_24h: usize,
    pub critical_errors: usize,
}
