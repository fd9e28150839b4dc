// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bku_core::{JobId, JobSettings, JobType};
use serde::{Deserialize, Serialize};

/// Request from CLI to daemon (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    CreateJob {
        name: String,
        source: String,
        dest: String,
        job_type: JobType,
        settings: JobSettings,
    },
    StartJob {
        job_id: JobId,
    },
    StopJob {
        job_id: JobId,
    },
    DeleteJob {
        job_id: JobId,
    },
    GetJobStatus {
        job_id: JobId,
    },
    ListJobs,
    Health,
    /// Upgrades the connection into a one-way stream of fan-out messages
    /// (§4.6) until the client disconnects.
    Subscribe,
}
