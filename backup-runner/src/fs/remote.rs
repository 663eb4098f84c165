//! Filesystem traversal on the far side of a [`RemoteShell`].
//!
//! All metadata comes from parsing `stat --printf='%F_%n'` output. Only
//! directories and regular files are reported; links and special files are
//! skipped.

use crate::archive::Archive;
use crate::fs::exclude::ExcludeSet;
use crate::fs::walker::root_label;
use crate::remote::{shell_quote, RemoteShell};
use crate::utils::{BackupError, Result};

const NO_EXISTS_MARKER: &str = "__STAT_NO_EXISTS__";
const NO_DIR_MARKER: &str = "__STAT_NO_DIR__";

/// What a remote path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Missing,
    Directory,
    File,
    Other,
}

/// A directory child as reported by the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Returned by walk visitors to steer the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    /// On a directory, do not descend into it. On a file, skip the rest of
    /// its siblings.
    SkipDir,
}

fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => "/",
    }
}

/// Parse one `%F_%n` line.
///
/// `Ok(None)` is returned for links and special files.
pub fn parse_stat_line(line: &str) -> Result<Option<RemoteFileEntry>> {
    let line = line.trim_end_matches(['\n', '\r']);
    let (kind, path) = line
        .split_once('_')
        .ok_or_else(|| BackupError::execution(format!("unrecognised stat output: {line:?}")))?;

    let is_dir = match kind {
        "directory" => true,
        "regular file" | "regular empty file" => false,
        "symbolic link" | "fifo" | "socket" | "character special file"
        | "block special file" => {
            tracing::debug!(path, kind, "Skipping non-regular remote file");
            return Ok(None);
        }
        _ => {
            return Err(BackupError::execution(format!(
                "file type not recognized: {line:?}"
            )))
        }
    };

    Ok(Some(RemoteFileEntry {
        name: base_name(path).to_string(),
        is_dir,
    }))
}

/// Stat a path, following links.
pub fn stat(shell: &dyn RemoteShell, path: &str) -> Result<PathKind> {
    let out = shell.output(&format!("stat -L --printf='%F_%n\\n' -- {}", shell_quote(path)))?;

    if !out.success() {
        if out.output.contains("No such file or directory") {
            return Ok(PathKind::Missing);
        }
        return Err(BackupError::execution(format!(
            "stat {path} failed with status {}: {}",
            out.status,
            out.output.trim()
        )));
    }

    let line = out.output.lines().find(|l| !l.is_empty()).unwrap_or_default();
    Ok(match parse_stat_line(line) {
        Ok(Some(entry)) if entry.is_dir => PathKind::Directory,
        Ok(Some(_)) => PathKind::File,
        Ok(None) | Err(_) => PathKind::Other,
    })
}

/// List the immediate children of a remote directory, sorted by name.
pub fn read_dir(shell: &dyn RemoteShell, path: &str) -> Result<Vec<RemoteFileEntry>> {
    let script = format!(
        r#"dir={path}
if [ ! -e "$dir" ]; then
  echo "{NO_EXISTS_MARKER}"
elif [ ! -d "$dir" ]; then
  echo "{NO_DIR_MARKER}"
else
  find -H "$dir" -mindepth 1 -maxdepth 1 -exec stat --printf='%F_%n\n' {{}} \;
fi"#,
        path = shell_quote(path),
    );

    let out = shell.output(&script)?;
    if !out.success() {
        return Err(BackupError::execution(format!(
            "listing {path} failed with status {}: {}",
            out.status,
            out.output.trim()
        )));
    }
    let marker = out.output.trim();
    if marker == NO_EXISTS_MARKER {
        return Err(BackupError::precondition(format!("{path} does not exist")));
    }
    if marker == NO_DIR_MARKER {
        return Err(BackupError::precondition(format!("{path} is not a directory")));
    }

    let mut entries = Vec::new();
    for line in out.output.lines().filter(|l| !l.is_empty()) {
        if let Some(entry) = parse_stat_line(line)? {
            entries.push(entry);
        }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Depth-first walk below `root`, calling `visit` with each path and entry.
///
/// The root itself is visited first.
pub fn walk<F>(shell: &dyn RemoteShell, root: &str, mut visit: F) -> Result<()>
where
    F: FnMut(&str, &RemoteFileEntry) -> Result<WalkControl>,
{
    let root_entry = match stat(shell, root)? {
        PathKind::Missing => {
            return Err(BackupError::precondition(format!("{root} does not exist")))
        }
        PathKind::Directory => RemoteFileEntry {
            name: base_name(root).to_string(),
            is_dir: true,
        },
        PathKind::File => RemoteFileEntry {
            name: base_name(root).to_string(),
            is_dir: false,
        },
        PathKind::Other => {
            return Err(BackupError::precondition(format!(
                "{root} is neither a file nor a directory"
            )))
        }
    };

    if visit(root, &root_entry)? == WalkControl::SkipDir || !root_entry.is_dir {
        return Ok(());
    }
    walk_dir(shell, root, &mut visit)
}

fn walk_dir<F>(shell: &dyn RemoteShell, dir: &str, visit: &mut F) -> Result<()>
where
    F: FnMut(&str, &RemoteFileEntry) -> Result<WalkControl>,
{
    for entry in read_dir(shell, dir)? {
        let path = join(dir, &entry.name);
        match visit(&path, &entry)? {
            WalkControl::SkipDir if entry.is_dir => continue,
            WalkControl::SkipDir => break,
            WalkControl::Continue if entry.is_dir => walk_dir(shell, &path, visit)?,
            WalkControl::Continue => {}
        }
    }
    Ok(())
}

/// Copy a remote target into the archive. Returns the number of entries added.
pub fn archive_target(
    shell: &dyn RemoteShell,
    archive: &mut Archive,
    root: &str,
    exclude: &ExcludeSet,
) -> Result<usize> {
    let label = root_label(root);
    let prefix = root.trim_end_matches('/');
    let mut added = 0;

    walk(shell, root, |path, entry| {
        if entry.is_dir {
            return Ok(WalkControl::Continue);
        }
        if exclude.matches(path) {
            tracing::debug!(path, "Excluded");
            return Ok(WalkControl::Continue);
        }

        let archive_path = match path.strip_prefix(prefix) {
            Some(rel) if !rel.is_empty() => format!("{label}{rel}"),
            _ => label.clone(),
        };

        let mut writer = archive.file_writer(&archive_path)?;
        shell.stream(&format!("cat -- {}", shell_quote(path)), &mut writer)?;
        tracing::debug!(entry = %archive_path, "Added");
        added += 1;
        Ok(WalkControl::Continue)
    })?;

    Ok(added)
}
