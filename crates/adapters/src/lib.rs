// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! bku-adapters: transfer engine adapters (rsync/rclone) and the
//! post-transfer deletion pipeline.

pub mod deletion;
pub mod engine;
pub mod error;
pub mod local_verify;
pub mod progress_parse;
pub mod rclone;
pub mod rsync;
pub mod termination;

pub use deletion::{
    count_files, run_per_file_cleanup, run_verify_then_delete_with_phase, DeletionOutcome, PreflightError,
    VerifyThenDeleteTarget,
};
pub use engine::{DeletionSpec, Engine, ToolDriver, TransferEngine};
pub use error::AdapterError;
pub use local_verify::LocalFsVerifyTarget;
pub use rclone::{new_cloud_copy_adapter, CloudCopyAdapter};
pub use rsync::{new_local_copy_adapter, LocalCopyAdapter};
pub use termination::TerminationClass;
