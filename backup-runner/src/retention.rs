//! Archive naming and the retention ("expurge") policy.

use crate::utils::{BackupError, Result};
use chrono::{DateTime, Local};
use regex::Regex;
use std::path::Path;

/// `strftime` layout of the timestamp embedded in archive names.
pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d-%H:%M:%S";

const ARCHIVE_SUFFIX: &str = "_backup.zip";

/// `<name>_<YYYY>_<MM>_<DD>-<HH>:<MM>:<SS>_backup.zip`
pub fn archive_file_name(profile_name: &str, at: DateTime<Local>) -> String {
    format!(
        "{profile_name}_{}{ARCHIVE_SUFFIX}",
        at.format(TIMESTAMP_FORMAT)
    )
}

/// Exact-match pattern for the archives of one profile.
///
/// The capture groups are year, month, day, hour, minute and second.
pub fn archive_pattern(profile_name: &str) -> Result<Regex> {
    if profile_name.is_empty() {
        return Err(BackupError::config("profile name cannot be empty"));
    }

    Regex::new(&format!(
        r"^{}_(\d{{4}})_(\d{{2}})_(\d{{2}})-(\d{{2}}):(\d{{2}}):(\d{{2}})_backup\.zip$",
        regex::escape(profile_name)
    ))
    .map_err(|e| BackupError::config(format!("invalid archive pattern for {profile_name}: {e}")))
}

type Stamp = [u32; 6];

fn stamp(pattern: &Regex, file_name: &str) -> Option<Stamp> {
    let caps = pattern.captures(file_name)?;
    let mut out = [0u32; 6];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = caps.get(i + 1)?.as_str().parse().ok()?;
    }
    Some(out)
}

/// Plan which of `files` to delete so that only the `keep` newest archives of
/// `profile_name` remain. Files belonging to other profiles are never chosen.
pub fn files_to_delete<S: AsRef<str>>(files: &[S], profile_name: &str, keep: usize) -> Result<Vec<String>> {
    let pattern = archive_pattern(profile_name)?;
    if keep == 0 {
        return Ok(Vec::new());
    }

    let mut found: Vec<(Stamp, &str)> = files
        .iter()
        .filter_map(|f| stamp(&pattern, f.as_ref()).map(|s| (s, f.as_ref())))
        .collect();

    // Stable: equal timestamps keep their listing order.
    found.sort_by_key(|(s, _)| *s);

    let excess = found.len().saturating_sub(keep);
    Ok(found[..excess].iter().map(|(_, f)| f.to_string()).collect())
}

/// Delete old archives of `profile_name` from `dir`, keeping the `keep`
/// newest. Returns the deleted file names.
pub fn expurge(dir: &Path, keep: usize, profile_name: &str) -> Result<Vec<String>> {
    let meta = std::fs::metadata(dir).map_err(|e| {
        BackupError::precondition(format!("unable to stat {}: {e}", dir.display()))
    })?;
    if !meta.is_dir() {
        return Err(BackupError::precondition(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".zip"))
        .collect();
    names.sort();

    let doomed = files_to_delete(&names, profile_name, keep)?;
    for name in &doomed {
        std::fs::remove_file(dir.join(name)).map_err(|e| {
            BackupError::execution(format!("unable to delete old zip file {name}: {e}"))
        })?;
        tracing::info!(file = %name, "Removed old backup");
    }

    Ok(doomed)
}
