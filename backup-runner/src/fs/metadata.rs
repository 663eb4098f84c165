//! Ownership and permission adjustment for produced files.

use crate::utils::{BackupError, Result};
use nix::unistd::{chown, User};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Change the owner and group of `path` to those of the named user.
pub fn apply_owner(path: &Path, user: &str) -> Result<()> {
    let account = User::from_name(user)
        .map_err(|e| BackupError::execution(format!("unable to look up user {user}: {e}")))?
        .ok_or_else(|| BackupError::execution(format!("unknown user {user}")))?;

    chown(path, Some(account.uid), Some(account.gid)).map_err(|e| {
        BackupError::execution(format!(
            "unable to change owner of {} to {user}: {e}",
            path.display()
        ))
    })?;

    tracing::debug!(path = %path.display(), user, "Changed owner");
    Ok(())
}

/// Set the permission bits of `path`.
pub fn apply_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
        BackupError::execution(format!(
            "unable to change mode of {} to {mode:o}: {e}",
            path.display()
        ))
    })?;

    tracing::debug!(path = %path.display(), mode = %format!("{mode:o}"), "Changed mode");
    Ok(())
}
