//! Mirroring of remote archives into a local directory.
//!
//! Only archives named after the correlation name are considered, and a file
//! that already exists locally is never fetched again.

use crate::fs::remote;
use crate::remote::{shell_quote, RemoteShell};
use crate::retention::archive_pattern;
use crate::utils::{BackupError, Result};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::Path;

/// Archives of `profile_name` present in `remote` but not in `local`, in
/// remote listing order.
pub fn find_missing<S: AsRef<str>>(remote: &[S], local: &[S], profile_name: &str) -> Result<Vec<String>> {
    let pattern = archive_pattern(profile_name)?;
    let local: HashSet<&str> = local.iter().map(|l| l.as_ref()).collect();

    Ok(remote
        .iter()
        .map(|r| r.as_ref())
        .filter(|r| pattern.is_match(r) && !local.contains(r))
        .map(str::to_string)
        .collect())
}

fn local_files(dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        BackupError::precondition(format!("error reading dir {}: {e}", dir.display()))
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn download(shell: &dyn RemoteShell, remote_file: &str, local_file: &Path) -> Result<u64> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(local_file)?;

    let result = shell
        .stream(&format!("cat -- {}", shell_quote(remote_file)), &mut file)
        .and_then(|n| {
            file.sync_all()?;
            Ok(n)
        });

    if result.is_err() {
        drop(file);
        if let Err(e) = std::fs::remove_file(local_file) {
            tracing::warn!(file = %local_file.display(), error = %e, "Unable to remove partial download");
        }
    }
    result
}

/// Fetch every archive of `profile_name` found in `remote_dir` that is not
/// yet in `local_dir`. Returns the names of the fetched files.
pub fn sync_missing(
    shell: &dyn RemoteShell,
    remote_dir: &str,
    local_dir: &Path,
    profile_name: &str,
) -> Result<Vec<String>> {
    let local = local_files(local_dir)?;
    let remote: Vec<String> = remote::read_dir(shell, remote_dir)?
        .into_iter()
        .filter(|e| !e.is_dir)
        .map(|e| e.name)
        .collect();

    let missing = find_missing(&remote, &local, profile_name)?;
    tracing::info!(
        remote = remote_dir,
        profile = profile_name,
        missing = missing.len(),
        "Compared remote and local archives"
    );

    let base = remote_dir.trim_end_matches('/');
    for name in &missing {
        tracing::debug!(file = %name, "Downloading remote file");
        let bytes = download(shell, &format!("{base}/{name}"), &local_dir.join(name)).map_err(|e| {
            BackupError::execution(format!("unable to download file {name}: {e}"))
        })?;
        tracing::debug!(file = %name, bytes, "Downloaded");
    }

    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{CommandOutput, LocalShell};
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_find_missing_is_set_difference() -> Result<()> {
        let remote = [
            "bla_2006_02_05-17:04:05_backup.zip",
            "bla_2006_02_06-17:04:05_backup.zip",
            "bla_2006_02_07-17:04:05_backup.zip",
            "other_2006_02_07-17:04:05_backup.zip",
            "bla_notes.txt",
        ];
        let local = [
            "bla_2006_02_06-17:04:05_backup.zip",
            "unrelated.zip",
        ];

        assert_eq!(
            find_missing(&remote, &local, "bla")?,
            vec![
                "bla_2006_02_05-17:04:05_backup.zip",
                "bla_2006_02_07-17:04:05_backup.zip"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_find_missing_rejects_empty_name() {
        let none: [&str; 0] = [];
        assert!(matches!(
            find_missing(&none, &none, ""),
            Err(BackupError::Config(_))
        ));
    }

    fn seed_remote(dir: &Path) -> std::io::Result<()> {
        fs::create_dir_all(dir.join("nested"))?;
        fs::write(dir.join("bla_2006_02_05-17:04:05_backup.zip"), b"first")?;
        fs::write(dir.join("bla_2006_02_06-17:04:05_backup.zip"), b"second")?;
        fs::write(dir.join("other_2006_02_06-17:04:05_backup.zip"), b"other")?;
        Ok(())
    }

    #[test]
    fn test_sync_missing_downloads_and_is_idempotent() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let remote_dir = temp_dir.path().join("remote");
        let local_dir = temp_dir.path().join("local");
        seed_remote(&remote_dir)?;
        fs::create_dir_all(&local_dir)?;
        fs::write(local_dir.join("bla_2006_02_06-17:04:05_backup.zip"), b"kept")?;

        let fetched = sync_missing(&LocalShell, remote_dir.to_str().unwrap(), &local_dir, "bla")?;
        assert_eq!(fetched, vec!["bla_2006_02_05-17:04:05_backup.zip"]);
        assert_eq!(
            fs::read(local_dir.join("bla_2006_02_05-17:04:05_backup.zip"))?,
            b"first"
        );
        // Existing local copies are left alone.
        assert_eq!(
            fs::read(local_dir.join("bla_2006_02_06-17:04:05_backup.zip"))?,
            b"kept"
        );
        assert!(!local_dir.join("other_2006_02_06-17:04:05_backup.zip").exists());

        let again = sync_missing(&LocalShell, remote_dir.to_str().unwrap(), &local_dir, "bla")?;
        assert!(again.is_empty());
        Ok(())
    }

    #[test]
    fn test_sync_missing_remote_not_a_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("plain");
        fs::write(&file, b"").unwrap();

        let err = sync_missing(&LocalShell, file.to_str().unwrap(), temp_dir.path(), "bla").unwrap_err();
        assert!(err.to_string().contains("is not a directory"));
    }

    /// Lists like a real shell but fails every download half way.
    struct FailingCat;

    impl RemoteShell for FailingCat {
        fn output(&self, cmd: &str) -> Result<CommandOutput> {
            LocalShell.output(cmd)
        }

        fn stream(&self, _cmd: &str, sink: &mut dyn Write) -> Result<u64> {
            sink.write_all(b"partial")?;
            Err(BackupError::execution("connection reset"))
        }
    }

    #[test]
    fn test_failed_download_removes_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let remote_dir = temp_dir.path().join("remote");
        let local_dir = temp_dir.path().join("local");
        seed_remote(&remote_dir).unwrap();
        fs::create_dir_all(&local_dir).unwrap();

        let err = sync_missing(&FailingCat, remote_dir.to_str().unwrap(), &local_dir, "bla").unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(fs::read_dir(&local_dir).unwrap().count(), 0);
    }
}
