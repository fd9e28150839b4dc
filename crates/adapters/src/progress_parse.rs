// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Progress-line parsers for the two transfer tools (§4.1). Each parser
//! extracts whatever fields a given output line carries; fields it can't
//! find stay `None` so [`Progress::merge`](bku_core::Progress::merge)
//! never clears already-populated state.

use std::sync::LazyLock;

use bku_core::ProgressDelta;
use regex::Regex;

// ── rsync ────────────────────────────────────────────────────────────────

static RSYNC_TO_CHECK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"to-ch(?:ec)?k=(\d+)/(\d+)").expect("valid regex"));
static RSYNC_BYTES_PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s,]+([\d,]+)[\s,]+(\d+)%").expect("valid regex"));
static RSYNC_SPEED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([\d.]+)\s*(MB|KB|GB)/s").expect("valid regex"));
static RSYNC_ETA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+):(\d+):(\d+)").expect("valid regex"));

/// Parse one line of `rsync --progress` output (possibly a
/// carriage-return-delimited chunk rather than a full line).
pub fn parse_rsync_line(line: &str) -> ProgressDelta {
    let mut delta = ProgressDelta::default();

    if let Some(caps) = RSYNC_TO_CHECK.captures(line) {
        if let (Ok(remaining), Ok(total)) = (caps[1].parse::<u64>(), caps[2].parse::<u64>()) {
            if total > 0 {
                let completed = total.saturating_sub(remaining);
                delta.percent = Some(((completed as f64 / total as f64) * 100.0) as u8);
            }
        }
    }

    if let Some(caps) = RSYNC_BYTES_PERCENT.captures(line) {
        if let Ok(bytes) = caps[1].replace(',', "").parse::<u64>() {
            delta.bytes_transferred = Some(bytes);
            if delta.percent.is_none() {
                if let Ok(percent) = caps[2].parse::<u8>() {
                    delta.percent = Some(percent);
                }
            }
        }
    }

    // Reconstruct total_bytes from transferred/percent, per §4.1: only
    // commit a new total if none is known yet or the new estimate differs
    // from the current one by more than 10% (the caller supplies
    // `current_total` for that comparison via `reconcile_total`).
    if let (Some(bytes), Some(percent)) = (delta.bytes_transferred, delta.percent) {
        if percent > 0 {
            delta.total_bytes = Some((bytes as f64 / (percent as f64 / 100.0)) as u64);
        }
    }

    if let Some(caps) = RSYNC_SPEED.captures(line) {
        if let Ok(value) = caps[1].parse::<f64>() {
            let multiplier = match caps[2].to_uppercase().as_str() {
                "KB" => 1024.0,
                "MB" => 1024.0 * 1024.0,
                "GB" => 1024.0 * 1024.0 * 1024.0,
                _ => 1.0,
            };
            delta.speed_bytes = Some((value * multiplier) as u64);
        }
    }

    if let Some(caps) = RSYNC_ETA.captures(line) {
        if let (Ok(h), Ok(m), Ok(s)) = (caps[1].parse::<u64>(), caps[2].parse::<u64>(), caps[3].parse::<u64>()) {
            delta.eta_seconds = Some(h * 3600 + m * 60 + s);
        }
    }

    delta
}

/// Drop a freshly-calculated `total_bytes` estimate unless it's the first
/// one seen or it differs from `current_total` by more than 10% (§4.1,
/// avoids thrashing the reported total on every line).
pub fn reconcile_total(delta: &mut ProgressDelta, current_total: u64) {
    if let Some(new_total) = delta.total_bytes {
        let keep = current_total == 0 || (new_total as i64 - current_total as i64).unsigned_abs() as f64 > current_total as f64 * 0.1;
        if !keep {
            delta.total_bytes = None;
        }
    }
}

// ── rclone ───────────────────────────────────────────────────────────────

static RCLONE_TRANSFERRED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Transferred:\s+([\d.]+\s*\w+)\s*/\s*([\d.]+\s*\w+),\s*(\d+)%").expect("valid regex")
});
static RCLONE_SPEED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+)\s*(\w+)/s").expect("valid regex"));
static RCLONE_ETA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ETA\s+(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?").expect("valid regex"));

/// Parse one line of `rclone --progress --stats 1s` stderr output.
pub fn parse_rclone_line(line: &str) -> ProgressDelta {
    let mut delta = ProgressDelta::default();
    if !line.contains("Transferred:") {
        return delta;
    }

    if let Some(caps) = RCLONE_TRANSFERRED.captures(line) {
        delta.bytes_transferred = parse_size(&caps[1]);
        delta.total_bytes = parse_size(&caps[2]);
        delta.percent = caps[3].parse::<u8>().ok();
    }

    if let Some(caps) = RCLONE_SPEED.captures(line) {
        delta.speed_bytes = parse_size(&format!("{} {}", &caps[1], &caps[2]));
    }

    if let Some(caps) = RCLONE_ETA.captures(line) {
        let hours: u64 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let minutes: u64 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let seconds: u64 = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        delta.eta_seconds = Some(hours * 3600 + minutes * 60 + seconds);
    }

    delta
}

/// Parse a size string like "1.234 MiB" or "10 GB" into bytes. Handles
/// both binary (KiB/MiB/GiB/TiB) and decimal (KB/MB/GB/TB) suffixes,
/// since rclone emits either depending on the remote.
fn parse_size(size_str: &str) -> Option<u64> {
    let trimmed = size_str.trim();
    let split_at = trimmed.find(|c: char| c.is_ascii_alphabetic())?;
    let (value_str, unit_str) = trimmed.split_at(split_at);
    let value: f64 = value_str.trim().parse().ok()?;
    let multiplier: f64 = match unit_str.trim().to_uppercase().as_str() {
        "B" => 1.0,
        "KIB" => 1024.0,
        "MIB" => 1024.0_f64.powi(2),
        "GIB" => 1024.0_f64.powi(3),
        "TIB" => 1024.0_f64.powi(4),
        "KB" => 1000.0,
        "MB" => 1000.0_f64.powi(2),
        "GB" => 1000.0_f64.powi(3),
        "TB" => 1000.0_f64.powi(4),
        _ => 1.0,
    };
    Some((value * multiplier) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsync_parses_to_check_percent() {
        let line = "  1,234,567  45%   2.34MB/s    0:01:23 (xfr#9, to-chk=55/100)";
        let delta = parse_rsync_line(line);
        assert_eq!(delta.percent, Some(45));
        assert_eq!(delta.bytes_transferred, Some(1_234_567));
        assert_eq!(delta.speed_bytes, Some((2.34 * 1024.0 * 1024.0) as u64));
        assert_eq!(delta.eta_seconds, Some(83));
    }

    #[test]
    fn rsync_falls_back_to_bare_percent_when_no_to_check() {
        let line = "  1,000,000  50%  1.00MB/s    0:00:10";
        let delta = parse_rsync_line(line);
        assert_eq!(delta.percent, Some(50));
        assert_eq!(delta.bytes_transferred, Some(1_000_000));
    }

    #[yare::parameterized(
        first_estimate = { 0, 1000, Some(1000) },
        small_delta_dropped = { 1000, 1030, None },
        large_delta_kept = { 1000, 2000, Some(2000) },
        exact_match_dropped = { 1000, 1000, None },
        ten_percent_boundary_dropped = { 1000, 1100, None },
    )]
    fn rsync_total_reconciliation(current_total: u64, new_estimate: u64, expected: Option<u64>) {
        let mut delta = ProgressDelta { total_bytes: Some(new_estimate), ..Default::default() };
        reconcile_total(&mut delta, current_total);
        assert_eq!(delta.total_bytes, expected);
    }

    #[test]
    fn rsync_unparseable_line_yields_empty_delta() {
        let delta = parse_rsync_line("building file list ...");
        assert_eq!(delta, ProgressDelta::default());
    }

    #[test]
    fn rclone_parses_transferred_line() {
        let line = "Transferred:   \t    1.234 MiB / 10.234 MiB, 12%, 2.456 MiB/s, ETA 1m30s";
        let delta = parse_rclone_line(line);
        assert_eq!(delta.percent, Some(12));
        assert_eq!(delta.bytes_transferred, Some((1.234 * 1024.0 * 1024.0) as u64));
        assert_eq!(delta.total_bytes, Some((10.234 * 1024.0 * 1024.0) as u64));
        assert_eq!(delta.eta_seconds, Some(90));
    }

    #[test]
    fn rclone_ignores_lines_without_transferred() {
        let delta = parse_rclone_line("Checks:                 0 / 0, -");
        assert_eq!(delta, ProgressDelta::default());
    }

    #[yare::parameterized(
        decimal_kb = { "10 KB", Some(10_000) },
        decimal_mb = { "10 MB", Some(10_000_000) },
        decimal_gb = { "10 GB", Some(10_000_000_000) },
        binary_kib = { "10 KiB", Some(10 * 1024) },
        binary_mib = { "10 MiB", Some(10 * 1024 * 1024) },
        binary_gib = { "10 GiB", Some(10 * 1024 * 1024 * 1024) },
        bare_bytes = { "10 B", Some(10) },
        fractional = { "1.5 MiB", Some((1.5 * 1024.0 * 1024.0) as u64) },
    )]
    fn rclone_parses_size_units(input: &str, expected: Option<u64>) {
        assert_eq!(parse_size(input), expected);
    }

    #[test]
    fn rclone_eta_with_only_seconds() {
        let line = "Transferred:   1 B / 2 B, 50%, 1 B/s, ETA 5s";
        let delta = parse_rclone_line(line);
        assert_eq!(delta.eta_seconds, Some(5));
    }
}
