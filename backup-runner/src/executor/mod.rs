//! Profile executor - runs profiles from destination to notification.
//!
//! Each profile moves through the [`Stage`]s in order. A failure stops that
//! profile only; the rest of the batch still runs. Notification happens after
//! the profile has settled and can never change its outcome.

pub mod collect;
pub mod stage;
pub mod summary;

pub use stage::Stage;
pub use summary::RunSummary;

use crate::archive::Archive;
use crate::config::Config;
use crate::dump::DumpSettings;
use crate::fs::metadata::{apply_mode, apply_owner};
use crate::notify::{Mailer, Notification, SmtpMailer};
use crate::profile::{Profile, ProfileKind};
use crate::remote::{RemoteShell, ShellConnector, SshConnector};
use crate::retention::{archive_file_name, expurge};
use crate::sync::sync_missing;
use crate::utils::{BackupError, Result};
use chrono::Local;
use collect::{collect_profile, Source};
use std::path::{Path, PathBuf};
use std::time::Instant;
use summary::{format_bytes, format_duration};
use tracing::{error, info, warn};

/// Runs profiles with a fixed set of collaborators.
pub struct Runner {
    dump: DumpSettings,
    connector: Box<dyn ShellConnector>,
    mailer: Box<dyn Mailer>,
    hostname: String,
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

impl Runner {
    /// SSH connections and SMTP delivery as configured.
    pub fn new(config: &Config) -> Self {
        Self::with_collaborators(
            config.dump.clone(),
            Box::new(SshConnector {
                host_keys: config.ssh.host_key_policy(),
                timeout: config.ssh.timeout(),
            }),
            Box::new(SmtpMailer),
        )
    }

    pub fn with_collaborators(
        dump: DumpSettings,
        connector: Box<dyn ShellConnector>,
        mailer: Box<dyn Mailer>,
    ) -> Self {
        Self {
            dump,
            connector,
            mailer,
            hostname: local_hostname(),
        }
    }

    /// Run every profile in order. Fails with [`BackupError::Batch`] if any
    /// profile failed.
    pub fn run_batch(&self, profiles: &[Profile]) -> Result<()> {
        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("batch", run_id = %run_id);
        let _guard = span.enter();

        info!(profiles = profiles.len(), "Starting backup run");

        let failed: Vec<String> = profiles
            .iter()
            .filter(|p| self.run_profile(p).is_err())
            .map(|p| p.name.clone())
            .collect();

        if failed.is_empty() {
            info!(profiles = profiles.len(), "Backup run completed");
            return Ok(());
        }

        error!(failed = failed.len(), total = profiles.len(), "Backup run completed with failures");
        Err(BackupError::Batch { failed })
    }

    /// Run one profile and send its notification.
    pub fn run_profile(&self, profile: &Profile) -> Result<RunSummary> {
        let span = tracing::info_span!("profile", name = %profile.name, kind = %profile.kind);
        let _guard = span.enter();

        let started = Instant::now();
        let mut stage = Stage::Pending;
        let mut result = self
            .execute(profile, &mut stage)
            .map(|mut summary| {
                summary.elapsed = started.elapsed();
                summary
            })
            .map_err(|e| BackupError::Profile {
                name: profile.name.clone(),
                stage,
                source: Box::new(e),
            });

        match &result {
            Ok(summary) => info!(
                archive = summary.archive.as_deref().unwrap_or("-"),
                entries = summary.entries,
                size = %format_bytes(summary.bytes),
                downloaded = summary.downloaded.len(),
                expurged = summary.expurged.len(),
                elapsed = %format_duration(summary.elapsed),
                "Profile completed"
            ),
            Err(e) => error!(error = %e, "Profile failed"),
        }

        self.notify(profile, &result);
        if let Ok(summary) = &mut result {
            summary.stage = Stage::Notified;
        }
        result
    }

    fn execute(&self, profile: &Profile, stage: &mut Stage) -> Result<RunSummary> {
        let destination = &profile.destination;

        *stage = Stage::PreparingDestination;
        prepare_destination(&destination.path)?;

        *stage = Stage::Collecting;
        let (mut summary, produced) = match profile.kind {
            ProfileKind::Local => self.collect_archive(profile, Source::Local)?,
            ProfileKind::Remote => {
                let shell = self.connect(profile)?;
                self.collect_archive(profile, Source::Remote(shell.as_ref()))?
            }
            ProfileKind::SftpSync => {
                let shell = self.connect(profile)?;
                self.sync_targets(profile, shell.as_ref())?
            }
        };

        *stage = Stage::AdjustingOwnership;
        for path in &produced {
            if let Some(owner) = &destination.owner {
                apply_owner(path, owner)?;
            }
            if let Some(mode) = destination.mode {
                apply_mode(path, mode)?;
            }
        }

        *stage = Stage::Expurging;
        if destination.keep > 0 {
            for name in retention_names(profile) {
                summary
                    .expurged
                    .extend(expurge(&destination.path, destination.keep, name)?);
            }
        }

        summary.stage = *stage;
        Ok(summary)
    }

    fn connect(&self, profile: &Profile) -> Result<Box<dyn RemoteShell>> {
        let ssh = profile.ssh.as_ref().ok_or_else(|| {
            BackupError::config(format!("profile {} has no ssh settings", profile.name))
        })?;
        self.connector.connect(ssh)
    }

    fn collect_archive(&self, profile: &Profile, source: Source<'_>) -> Result<(RunSummary, Vec<PathBuf>)> {
        let file_name = archive_file_name(&profile.name, Local::now());
        let path = profile.destination.path.join(&file_name);

        let mut archive = Archive::open(&path)?;
        info!(archive = %path.display(), "Writing archive");

        let collected = collect_profile(source, &mut archive, profile, &self.dump)
            .and_then(|()| archive.close());
        let (entries, bytes) = (archive.entries(), archive.bytes());
        drop(archive);

        if let Err(cause) = collected {
            return Err(discard_partial(&path, cause));
        }

        let summary = RunSummary {
            archive: Some(file_name),
            entries,
            bytes,
            ..RunSummary::default()
        };
        Ok((summary, vec![path]))
    }

    fn sync_targets(&self, profile: &Profile, shell: &dyn RemoteShell) -> Result<(RunSummary, Vec<PathBuf>)> {
        let destination = &profile.destination.path;
        let mut summary = RunSummary::default();

        for target in &profile.targets {
            let name = target.name.as_deref().ok_or_else(|| {
                BackupError::config("profile name for sync path cannot be empty")
            })?;
            info!(remote = %target.path, name, "Syncing remote archives");
            summary
                .downloaded
                .extend(sync_missing(shell, &target.path, destination, name)?);
        }

        let produced = summary.downloaded.iter().map(|f| destination.join(f)).collect();
        summary.entries = summary.downloaded.len();
        Ok((summary, produced))
    }

    fn notify(&self, profile: &Profile, result: &Result<RunSummary>) {
        let Some(spec) = &profile.notify else {
            return;
        };

        let notification = match result {
            Ok(_) if spec.on_success => Notification::success(&profile.name, &self.hostname),
            Ok(_) => return,
            Err(e) => Notification::failure(&profile.name, &self.hostname, e),
        };

        if let Err(e) = self.mailer.send(spec, &notification) {
            warn!(error = %e, "Unable to send notification");
        }
    }
}

/// Archive names retention applies to.
fn retention_names(profile: &Profile) -> Vec<&str> {
    match profile.kind {
        ProfileKind::SftpSync => profile
            .targets
            .iter()
            .filter_map(|t| t.name.as_deref())
            .collect(),
        _ => vec![profile.name.as_str()],
    }
}

fn prepare_destination(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(BackupError::precondition(format!(
            "destination {} is not a directory",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(path)?;
            info!(path = %path.display(), "Created destination directory");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Remove an incomplete archive after a collection failure.
fn discard_partial(path: &Path, cause: BackupError) -> BackupError {
    match std::fs::remove_file(path) {
        Ok(()) => {
            warn!(archive = %path.display(), "Removed incomplete archive");
            cause
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => cause,
        Err(e) => BackupError::Cleanup {
            cause: Box::new(cause),
            cleanup: Box::new(e.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::list_entries;
    use crate::dump::DbEngine;
    use crate::fs::exclude::ExcludeSet;
    use crate::profile::{BackupTarget, DatabaseTarget, Destination, NotifySpec, SshAuth, SshSpec};
    use crate::remote::LocalConnector;
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    type Outbox = Rc<RefCell<Vec<Notification>>>;

    struct RecordingMailer {
        outbox: Outbox,
        fail: bool,
    }

    impl Mailer for RecordingMailer {
        fn send(&self, _spec: &NotifySpec, notification: &Notification) -> Result<()> {
            self.outbox.borrow_mut().push(notification.clone());
            if self.fail {
                return Err(BackupError::Mail("relay refused".to_string()));
            }
            Ok(())
        }
    }

    struct RefusingConnector;

    impl ShellConnector for RefusingConnector {
        fn connect(&self, ssh: &SshSpec) -> Result<Box<dyn RemoteShell>> {
            Err(BackupError::execution(format!("unable to connect to {}", ssh.host)))
        }
    }

    fn runner_with(settings: DumpSettings, connector: Box<dyn ShellConnector>, fail_mail: bool) -> (Runner, Outbox) {
        let outbox = Outbox::default();
        let mailer = RecordingMailer {
            outbox: outbox.clone(),
            fail: fail_mail,
        };
        (
            Runner::with_collaborators(settings, connector, Box::new(mailer)),
            outbox,
        )
    }

    fn runner() -> (Runner, Outbox) {
        runner_with(DumpSettings::default(), Box::new(LocalConnector), false)
    }

    /// `files/dir1/{file.json, subdir1/{subfile.log, subfile1.txt}}` and
    /// `files/dir2/file.yaml`.
    fn sample_data(root: &Path) -> std::io::Result<PathBuf> {
        let files = root.join("files");
        fs::create_dir_all(files.join("dir1/subdir1"))?;
        fs::create_dir_all(files.join("dir2"))?;
        fs::write(files.join("dir1/file.json"), b"{\"k\": 1}")?;
        fs::write(files.join("dir1/subdir1/subfile.log"), b"log")?;
        fs::write(files.join("dir1/subdir1/subfile1.txt"), b"txt")?;
        fs::write(files.join("dir2/file.yaml"), b"k: 1")?;
        Ok(files)
    }

    fn target(path: &Path) -> BackupTarget {
        BackupTarget {
            path: path.to_string_lossy().into_owned(),
            name: None,
            exclude: ExcludeSet::default(),
        }
    }

    fn profile(name: &str, kind: ProfileKind, targets: Vec<BackupTarget>, dest: &Path) -> Profile {
        Profile {
            name: name.to_string(),
            kind,
            targets,
            databases: Vec::new(),
            destination: Destination {
                path: dest.to_path_buf(),
                keep: 0,
                owner: None,
                mode: None,
            },
            ssh: Some(SshSpec {
                host: "localhost".to_string(),
                port: 22,
                user: "backup".to_string(),
                auth: SshAuth::Agent,
            }),
            notify: None,
        }
    }

    fn notify_spec(on_success: bool) -> NotifySpec {
        NotifySpec {
            host: "smtp.example.com".to_string(),
            port: 587,
            user: None,
            password: None,
            from: "backup@example.com".to_string(),
            to: vec!["ops@example.com".to_string()],
            on_success,
        }
    }

    fn zip_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".zip"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_local_profile_single_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let files = sample_data(temp_dir.path())?;
        let dest = temp_dir.path().join("backups/nested");

        let (runner, _) = runner();
        let summary = runner.run_profile(&profile(
            "bla",
            ProfileKind::Local,
            vec![target(&files.join("dir1"))],
            &dest,
        ))?;

        let archive = summary.archive.unwrap();
        assert!(archive.starts_with("bla_") && archive.ends_with("_backup.zip"));
        assert_eq!(summary.entries, 3);
        assert_eq!(
            list_entries(&dest.join(&archive))?,
            vec![
                "dir1/file.json",
                "dir1/subdir1/subfile.log",
                "dir1/subdir1/subfile1.txt"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_local_profile_with_database() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let files = sample_data(temp_dir.path())?;
        let dest = temp_dir.path().join("backups");

        let mut p = profile(
            "bli",
            ProfileKind::Local,
            vec![target(&files.join("dir1")), target(&files.join("dir2"))],
            &dest,
        );
        p.databases.push(DatabaseTarget {
            name: "mydb".to_string(),
            engine: DbEngine::Mysql,
            user: Some("user".to_string()),
            password: Some("pw".to_string()),
            container: None,
        });

        let settings = DumpSettings {
            mysqldump: "echo".to_string(),
            ..DumpSettings::default()
        };
        let (runner, _) = runner_with(settings, Box::new(LocalConnector), false);
        let summary = runner.run_profile(&p)?;

        assert_eq!(
            list_entries(&dest.join(summary.archive.unwrap()))?,
            vec![
                "dir1/file.json",
                "dir1/subdir1/subfile.log",
                "dir1/subdir1/subfile1.txt",
                "dir2/file.yaml",
                "_mysqldump/mydb.dump.sql"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_failed_dump_removes_archive() {
        let temp_dir = TempDir::new().unwrap();
        let files = sample_data(temp_dir.path()).unwrap();
        let dest = temp_dir.path().join("backups");

        let mut p = profile("bli", ProfileKind::Local, vec![target(&files)], &dest);
        p.databases.push(DatabaseTarget {
            name: "mydb".to_string(),
            engine: DbEngine::Mysql,
            user: Some("fail".to_string()),
            password: None,
            container: None,
        });

        let settings = DumpSettings {
            mysqldump: "false".to_string(),
            ..DumpSettings::default()
        };
        let (runner, _) = runner_with(settings, Box::new(LocalConnector), false);
        let err = runner.run_profile(&p).unwrap_err();

        match err {
            BackupError::Profile { name, stage, source } => {
                assert_eq!(name, "bli");
                assert_eq!(stage, Stage::Collecting);
                assert!(matches!(*source, BackupError::Execution(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(zip_files(&dest).is_empty());
    }

    #[test]
    fn test_missing_source_removes_archive() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("backups");
        let p = profile(
            "bla",
            ProfileKind::Local,
            vec![target(&temp_dir.path().join("does-not-exist"))],
            &dest,
        );

        let (runner, _) = runner();
        let err = runner.run_profile(&p).unwrap_err();
        assert!(err.to_string().contains("collecting"));
        assert!(zip_files(&dest).is_empty());
    }

    #[test]
    fn test_destination_must_be_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("occupied");
        fs::write(&dest, b"").unwrap();
        let p = profile("bla", ProfileKind::Local, vec![target(temp_dir.path())], &dest);

        let (runner, _) = runner();
        match runner.run_profile(&p).unwrap_err() {
            BackupError::Profile { stage, source, .. } => {
                assert_eq!(stage, Stage::PreparingDestination);
                assert!(matches!(*source, BackupError::Precondition(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_keep_retains_two_newest() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let files = sample_data(temp_dir.path())?;
        let dest = temp_dir.path().join("backups");
        fs::create_dir_all(&dest)?;
        for day in 5..=9 {
            fs::write(dest.join(format!("bli_2006_02_{day:02}-17:04:05_backup.zip")), b"")?;
        }
        fs::write(dest.join("other_2006_02_01-17:04:05_backup.zip"), b"")?;

        let mut p = profile("bli", ProfileKind::Local, vec![target(&files)], &dest);
        p.destination.keep = 2;

        let (runner, _) = runner();
        let summary = runner.run_profile(&p)?;
        assert_eq!(summary.expurged.len(), 4);

        let archive = summary.archive.unwrap();
        let mut expected = vec![
            "bli_2006_02_09-17:04:05_backup.zip".to_string(),
            archive,
            "other_2006_02_01-17:04:05_backup.zip".to_string(),
        ];
        expected.sort();
        assert_eq!(zip_files(&dest), expected);
        Ok(())
    }

    #[test]
    fn test_mode_applied_to_archive() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        let files = sample_data(temp_dir.path())?;
        let dest = temp_dir.path().join("backups");

        let mut p = profile("bla", ProfileKind::Local, vec![target(&files)], &dest);
        p.destination.mode = Some(0o600);

        let (runner, _) = runner();
        let summary = runner.run_profile(&p)?;
        let mode = fs::metadata(dest.join(summary.archive.unwrap()))?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        Ok(())
    }

    #[test]
    fn test_remote_profile_through_shell() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let files = sample_data(temp_dir.path())?;
        let dest = temp_dir.path().join("backups");

        let mut t = target(&files);
        t.exclude = ExcludeSet::new(&["*.log"])?;
        let p = profile("web", ProfileKind::Remote, vec![t], &dest);

        let (runner, _) = runner();
        let summary = runner.run_profile(&p)?;
        assert_eq!(
            list_entries(&dest.join(summary.archive.unwrap()))?,
            vec![
                "files/dir1/file.json",
                "files/dir1/subdir1/subfile1.txt",
                "files/dir2/file.yaml"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_sync_profile_downloads_and_expurges() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let remote = temp_dir.path().join("remote");
        let dest = temp_dir.path().join("mirror");
        fs::create_dir_all(&remote)?;
        fs::create_dir_all(&dest)?;
        for day in 5..=7 {
            fs::write(remote.join(format!("shop_2006_02_{day:02}-17:04:05_backup.zip")), b"zip")?;
        }
        fs::write(dest.join("shop_2006_02_04-17:04:05_backup.zip"), b"old")?;

        let mut t = target(&remote);
        t.name = Some("shop".to_string());
        let mut p = profile("mirror", ProfileKind::SftpSync, vec![t], &dest);
        p.destination.keep = 2;
        p.destination.mode = Some(0o640);

        let (runner, _) = runner();
        let summary = runner.run_profile(&p)?;

        assert!(summary.archive.is_none());
        assert_eq!(summary.downloaded.len(), 3);
        assert_eq!(
            zip_files(&dest),
            vec![
                "shop_2006_02_06-17:04:05_backup.zip",
                "shop_2006_02_07-17:04:05_backup.zip"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_batch_continues_after_failure() {
        let temp_dir = TempDir::new().unwrap();
        let files = sample_data(temp_dir.path()).unwrap();
        let dest = temp_dir.path().join("backups");

        let profiles = vec![
            profile("remote1", ProfileKind::Remote, vec![target(&files)], &dest),
            profile("local1", ProfileKind::Local, vec![target(&files)], &dest),
        ];

        let (runner, _) = runner_with(DumpSettings::default(), Box::new(RefusingConnector), false);
        let err = runner.run_batch(&profiles).unwrap_err();

        assert_eq!(err.to_string(), "at least one profile failed: remote1");
        let archives = zip_files(&dest);
        assert_eq!(archives.len(), 1);
        assert!(archives[0].starts_with("local1_"));
    }

    #[test]
    fn test_notifications() {
        let temp_dir = TempDir::new().unwrap();
        let files = sample_data(temp_dir.path()).unwrap();
        let dest = temp_dir.path().join("backups");

        let mut quiet = profile("quiet", ProfileKind::Local, vec![target(&files)], &dest);
        quiet.notify = Some(notify_spec(false));
        let mut loud = profile("loud", ProfileKind::Local, vec![target(&files)], &dest);
        loud.notify = Some(notify_spec(true));
        let mut broken = profile("broken", ProfileKind::Local, vec![target(&dest.join("missing"))], &dest);
        broken.notify = Some(notify_spec(false));

        let (runner, outbox) = runner();
        assert_eq!(runner.run_profile(&quiet).unwrap().stage, Stage::Notified);
        assert_eq!(runner.run_profile(&loud).unwrap().stage, Stage::Notified);
        assert!(runner.run_profile(&broken).is_err());

        let sent = outbox.borrow();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].subject.contains("loud"));
        assert!(sent[1].subject.contains("broken"));
        assert!(sent[1].body.contains("collecting"));
    }

    #[test]
    fn test_mail_failure_does_not_fail_profile() {
        let temp_dir = TempDir::new().unwrap();
        let files = sample_data(temp_dir.path()).unwrap();
        let dest = temp_dir.path().join("backups");

        let mut p = profile("bla", ProfileKind::Local, vec![target(&files)], &dest);
        p.notify = Some(notify_spec(true));

        let (runner, outbox) = runner_with(DumpSettings::default(), Box::new(LocalConnector), true);
        assert!(runner.run_profile(&p).is_ok());
        assert_eq!(outbox.borrow().len(), 1);
    }
}
