// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriber fan-out message shapes (§4.6). Sent one-way to a client that
//! upgraded its connection via `Request::Subscribe`.

use bku_core::{DeletionState, Job, JobId, JobStatus};
use serde::{Deserialize, Serialize};

/// A message pushed to a subscribed client. Messages for the same
/// `job_id` are delivered to a given subscriber in the order they were
/// enqueued by the event monitor; no cross-job ordering is guaranteed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FanoutMessage {
    JobUpdate(JobFanoutPayload),
    JobFinalUpdate(JobFanoutPayload),
    Notification { level: FanoutLevel, message: String, details: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutLevel {
    Info,
    Warning,
    Error,
    Success,
}

bku_core::simple_display! {
    FanoutLevel {
        Info => "info",
        Warning => "warning",
        Error => "error",
        Success => "success",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFanoutPayload {
    pub job_id: JobId,
    pub status: JobStatus,
    pub percent: u8,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub speed_bytes: u64,
    pub eta_seconds: u64,
    pub deletion: Option<DeletionState>,
}

impl JobFanoutPayload {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            percent: job.progress.percent,
            bytes_transferred: job.progress.bytes_transferred,
            total_bytes: job.progress.total_bytes,
            speed_bytes: job.progress.speed_bytes,
            eta_seconds: job.progress.eta_seconds,
            deletion: job.progress.deletion.clone(),
        }
    }
}

impl FanoutMessage {
    pub fn job_update(job: &Job) -> Self {
        FanoutMessage::JobUpdate(JobFanoutPayload::from_job(job))
    }

    pub fn job_final_update(job: &Job) -> Self {
        FanoutMessage::JobFinalUpdate(JobFanoutPayload::from_job(job))
    }
}
