//! Local directory traversal feeding the archive writer.
//!
//! Every non-excluded, non-directory item below a declared root is yielded
//! once, in file-name order, under `<basename(root)>/<relative path>`.

use crate::archive::Archive;
use crate::fs::exclude::ExcludeSet;
use crate::utils::{BackupError, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One item discovered below a declared root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Path on the local filesystem, as walked.
    pub source: PathBuf,

    /// Logical path inside the archive.
    pub archive_path: String,

    /// Symlinks are archived as links, never followed.
    pub is_symlink: bool,
}

/// Name of the top-level archive folder for a declared root.
pub(crate) fn root_label(root: &str) -> String {
    let trimmed = root.trim_end_matches('/');
    match trimmed.rsplit('/').next() {
        Some(name) if !name.is_empty() && name != "." && name != ".." => name.to_string(),
        _ => "root".to_string(),
    }
}

/// Walk a declared root and call `visit` for every entry to archive.
pub fn walk_target<F>(root: &Path, exclude: &ExcludeSet, mut visit: F) -> Result<()>
where
    F: FnMut(&WalkEntry) -> Result<()>,
{
    let meta = std::fs::symlink_metadata(root).map_err(|e| {
        BackupError::precondition(format!("unable to stat {}: {e}", root.display()))
    })?;

    let label = root_label(&root.to_string_lossy());

    // A root that is itself a link is resolved once; links below it are not.
    let resolved = if meta.file_type().is_symlink() {
        std::fs::canonicalize(root).map_err(|e| {
            BackupError::precondition(format!("unable to resolve {}: {e}", root.display()))
        })?
    } else {
        root.to_path_buf()
    };

    if !resolved.is_dir() {
        let source_str = resolved.to_string_lossy();
        if exclude.matches(&source_str) {
            tracing::debug!(path = %source_str, "Excluded");
            return Ok(());
        }
        return visit(&WalkEntry {
            source: resolved.clone(),
            archive_path: label,
            is_symlink: false,
        });
    }

    let walker = WalkDir::new(&resolved)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| {
            BackupError::execution(format!("error walking {}: {e}", resolved.display()))
        })?;

        if entry.file_type().is_dir() {
            continue;
        }

        let source_str = entry.path().to_string_lossy();
        if exclude.matches(&source_str) {
            tracing::debug!(path = %source_str, "Excluded");
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(&resolved)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        visit(&WalkEntry {
            source: entry.path().to_path_buf(),
            archive_path: format!("{label}/{relative}"),
            is_symlink: entry.path_is_symlink(),
        })?;
    }

    Ok(())
}

/// Copy a local target into the archive. Returns the number of entries added.
pub fn archive_target(archive: &mut Archive, root: &Path, exclude: &ExcludeSet) -> Result<usize> {
    let mut added = 0;

    walk_target(root, exclude, |entry| {
        if entry.is_symlink {
            let target = std::fs::read_link(&entry.source)?;
            archive.add_symlink(&entry.archive_path, &target.to_string_lossy())?;
        } else {
            archive.add_file(&entry.source, &entry.archive_path)?;
        }
        tracing::debug!(entry = %entry.archive_path, "Added");
        added += 1;
        Ok(())
    })?;

    Ok(added)
}
