// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide daemon settings (C9).

use serde::{Deserialize, Serialize};

use crate::job::VerificationMode;

/// Daemon-wide defaults, persisted alongside the job store via the
/// settings store (§4.9). Per-job `JobSettings` may override the ones
/// that make sense per-job; the rest (poll interval, retry ceiling) are
/// process-wide only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DaemonSettings {
    /// KB/s applied to jobs that don't set their own limit; 0 = unlimited.
    pub default_bandwidth_limit: u64,
    /// Whether jobs left `Running` at shutdown resume automatically.
    pub auto_start_on_launch: bool,
    pub network_check_interval_secs: u64,
    pub max_retry_attempts: u32,
    /// Event monitor poll cadence (§4.5).
    pub auto_refresh_interval_secs: u64,
    pub verification_mode: VerificationMode,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            default_bandwidth_limit: 0,
            auto_start_on_launch: false,
            network_check_interval_secs: 30,
            max_retry_attempts: 5,
            auto_refresh_interval_secs: 2,
            verification_mode: VerificationMode::Fast,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let s = DaemonSettings::default();
        assert!(!s.auto_start_on_launch);
        assert_eq!(s.default_bandwidth_limit, 0);
        assert!(s.max_retry_attempts > 0);
    }

    #[test]
    fn unknown_keys_rejected() {
        let json = r#"{"max_retry_attempts": 3, "typo_field": 1}"#;
        let result: Result<DaemonSettings, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
