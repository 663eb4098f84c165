//! Human readable run summaries.

use super::Stage;
use std::time::Duration;

/// Outcome of a successful profile run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Archive written, if the profile produces one.
    pub archive: Option<String>,
    pub entries: usize,
    pub bytes: u64,
    /// Files fetched by a sync profile.
    pub downloaded: Vec<String>,
    /// Old archives removed by retention.
    pub expurged: Vec<String>,
    pub elapsed: Duration,
    /// Last stage reached, [`Stage::Notified`] once `run_profile` returns.
    pub stage: Stage,
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    if seconds < 60 {
        format!("{}.{:01}s", seconds, elapsed.subsec_millis() / 100)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
