// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::job::{Job, JobId, JobSettings, JobStatus, JobType};

/// Proptest strategies for core state machine types.
pub mod strategies {
    use crate::job::{DeletionMode, JobStatus, JobType, VerificationMode};
    use proptest::prelude::*;

    pub fn arb_job_status() -> impl Strategy<Value = JobStatus> {
        prop_oneof![
            Just(JobStatus::Pending),
            Just(JobStatus::Running),
            Just(JobStatus::Paused),
            Just(JobStatus::Completed),
            Just(JobStatus::Failed),
        ]
    }

    pub fn arb_job_type() -> impl Strategy<Value = JobType> {
        prop_oneof![Just(JobType::LocalCopy), Just(JobType::CloudCopy)]
    }

    pub fn arb_deletion_mode() -> impl Strategy<Value = DeletionMode> {
        prop_oneof![Just(DeletionMode::VerifyThenDelete), Just(DeletionMode::PerFile)]
    }

    pub fn arb_verification_mode() -> impl Strategy<Value = VerificationMode> {
        prop_oneof![
            Just(VerificationMode::Fast),
            Just(VerificationMode::Checksum),
            Just(VerificationMode::VerifyAfter),
        ]
    }
}

/// A job with a fixed id, useful when a test needs to assert on the id
/// it supplied rather than a freshly generated one.
pub fn job_with_id(id: &str, name: &str) -> Job {
    let mut job =
        Job::new(name.to_string(), "/tmp/src".into(), "/tmp/dst".into(), JobType::LocalCopy, JobSettings::default(), 1_000_000);
    job.id = JobId::from_string(id);
    job
}

pub fn running_job(id: &str, name: &str) -> Job {
    let mut job = job_with_id(id, name);
    job.status = JobStatus::Running;
    job
}

pub fn job_with_deletion(id: &str, name: &str, confirmed: bool) -> Job {
    let settings = JobSettings { delete_source_after: true, deletion_confirmed: confirmed, ..Default::default() };
    let mut job =
        Job::new(name.to_string(), "/tmp/src".into(), "/tmp/dst".into(), JobType::LocalCopy, settings, 1_000_000);
    job.id = JobId::from_string(id);
    job
}
