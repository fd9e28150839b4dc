// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! bku-engine: the job supervisor (C4) and event monitor (C5) that sit
//! between the durable job store and the live transfer adapters.

pub mod error;
pub mod monitor;
pub mod supervisor;

pub use error::SupervisorError;
pub use monitor::{run_cycle, run_loop, EventSink, NotificationLevel, NullSink};
pub use supervisor::Supervisor;
