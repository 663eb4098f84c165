//! Filling an archive from a profile's targets and databases.

use crate::archive::Archive;
use crate::dump::{self, DumpCommand, DumpSettings};
use crate::fs::{remote, walker};
use crate::profile::{BackupTarget, DatabaseTarget, Profile};
use crate::remote::RemoteShell;
use crate::utils::Result;
use std::path::Path;

/// Where targets are read and dumps are run.
#[derive(Clone, Copy)]
pub enum Source<'a> {
    Local,
    Remote(&'a dyn RemoteShell),
}

pub fn collect_target(source: Source<'_>, archive: &mut Archive, target: &BackupTarget) -> Result<usize> {
    tracing::info!(path = %target.path, "Collecting");
    match source {
        Source::Local => walker::archive_target(archive, Path::new(&target.path), &target.exclude),
        Source::Remote(shell) => remote::archive_target(shell, archive, &target.path, &target.exclude),
    }
}

pub fn dump_database(
    source: Source<'_>,
    archive: &mut Archive,
    db: &DatabaseTarget,
    settings: &DumpSettings,
) -> Result<u64> {
    let command = DumpCommand::for_target(db, settings)?;
    let entry = dump::entry_path(db);
    tracing::info!(database = %db.name, engine = %db.engine, entry = %entry, "Dumping database");

    let mut writer = archive.file_writer(&entry)?;
    match source {
        Source::Local => command.run_local(&mut writer),
        Source::Remote(shell) => command.run_remote(shell, &mut writer),
    }
}

/// Every target, then every database, in declaration order.
pub fn collect_profile(
    source: Source<'_>,
    archive: &mut Archive,
    profile: &Profile,
    settings: &DumpSettings,
) -> Result<()> {
    for target in &profile.targets {
        let added = collect_target(source, archive, target)?;
        tracing::debug!(path = %target.path, entries = added, "Target collected");
    }
    for db in &profile.databases {
        dump_database(source, archive, db, settings)?;
    }
    Ok(())
}
