//! Loading and validating profile files.

use super::{
    BackupTarget, DatabaseTarget, Destination, NotifySpec, Profile, ProfileKind, SshAuth, SshSpec,
};
use crate::dump::DbEngine;
use crate::fs::exclude::ExcludeSet;
use crate::utils::paths::expand_tilde;
use crate::utils::{BackupError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directory scans only pick up files with this suffix.
pub const PROFILE_SUFFIX: &str = ".backup.yaml";

const SCHEMA_VERSION: u32 = 1;
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_PRIVATE_KEY: &str = "~/.ssh/id_rsa";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProfile {
    version: Option<u32>,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    ssh: Option<RawSsh>,
    #[serde(default)]
    dirs: Vec<RawDir>,
    #[serde(default)]
    dbs: Vec<RawDb>,
    destination: Option<RawDestination>,
    notify: Option<RawNotify>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSsh {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    host: String,
    port: Option<u16>,
    #[serde(default)]
    user: String,
    password: Option<String>,
    private_key: Option<String>,
    passphrase: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDir {
    #[serde(default)]
    path: String,
    name: Option<String>,
    #[serde(default)]
    exclude: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDb {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    container_name: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDestination {
    #[serde(default)]
    path: String,
    #[serde(default)]
    keep: usize,
    owner: Option<String>,
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNotify {
    #[serde(default)]
    host: String,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    from: Option<String>,
    #[serde(default)]
    to: Vec<String>,
    #[serde(default)]
    on_success: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_kind(kind: Option<&str>) -> Result<ProfileKind> {
    match kind {
        None | Some("") => Err(BackupError::config("profile has no type")),
        Some("local") => Ok(ProfileKind::Local),
        Some("remote") => Ok(ProfileKind::Remote),
        Some("sftpsync") => Ok(ProfileKind::SftpSync),
        Some(other) => Err(BackupError::config(format!(
            "profile type {other:?} is not allowed"
        ))),
    }
}

fn parse_mode(mode: &str) -> Result<u32> {
    let digits = mode.trim();
    let digits = digits.strip_prefix("0o").unwrap_or(digits);
    match u32::from_str_radix(digits, 8) {
        Ok(value) if value <= 0o7777 => Ok(value),
        _ => Err(BackupError::config(format!("invalid file mode {mode:?}"))),
    }
}

fn build_ssh(raw: RawSsh) -> Result<SshSpec> {
    if raw.host.trim().is_empty() {
        return Err(BackupError::config("ssh host cannot be empty"));
    }

    let auth = match raw.kind.as_deref() {
        Some("password") => SshAuth::Password(raw.password.unwrap_or_default()),
        Some("sshkey") => SshAuth::Key {
            path: expand_tilde(
                non_empty(raw.private_key)
                    .as_deref()
                    .unwrap_or(DEFAULT_PRIVATE_KEY),
            ),
            passphrase: non_empty(raw.passphrase),
        },
        Some("sshagent") => SshAuth::Agent,
        other => {
            return Err(BackupError::config(format!(
                "ssh type {:?} is not allowed",
                other.unwrap_or_default()
            )))
        }
    };

    Ok(SshSpec {
        host: raw.host,
        port: raw.port.unwrap_or(DEFAULT_SSH_PORT),
        user: raw.user,
        auth,
    })
}

fn build_db(raw: RawDb) -> Result<DatabaseTarget> {
    if raw.name.trim().is_empty() {
        return Err(BackupError::config("database name cannot be empty"));
    }
    let engine: DbEngine = raw
        .kind
        .as_deref()
        .ok_or_else(|| BackupError::config(format!("database {} has no type", raw.name)))?
        .parse()?;

    let container = non_empty(raw.container_name);
    if engine.in_docker() && container.is_none() {
        return Err(BackupError::config(format!(
            "database {} of type {engine} needs a containerName",
            raw.name
        )));
    }

    Ok(DatabaseTarget {
        name: raw.name,
        engine,
        user: non_empty(raw.user),
        password: non_empty(raw.password),
        container,
    })
}

fn build_notify(raw: RawNotify) -> Result<NotifySpec> {
    let user = non_empty(raw.user);
    let from = non_empty(raw.from).or_else(|| user.clone());

    let from = match from {
        Some(from) if !raw.host.trim().is_empty() && !raw.to.is_empty() => from,
        _ => {
            return Err(BackupError::config(
                "notify needs a host, a sender and at least one recipient",
            ))
        }
    };

    Ok(NotifySpec {
        host: raw.host,
        port: raw.port.unwrap_or(DEFAULT_SMTP_PORT),
        user,
        password: non_empty(raw.password),
        from,
        to: raw.to,
        on_success: raw.on_success,
    })
}

fn build_profile(raw: RawProfile) -> Result<Profile> {
    match raw.version {
        Some(SCHEMA_VERSION) => {}
        Some(other) => {
            return Err(BackupError::config(format!(
                "unsupported profile version: {other}"
            )))
        }
        None => return Err(BackupError::config("profile has no version")),
    }

    if raw.name.trim().is_empty() {
        return Err(BackupError::config("profile name cannot be empty"));
    }
    if raw.name == "." || raw.name == ".." || raw.name.contains(['/', '\0']) {
        return Err(BackupError::config(format!(
            "profile name {:?} cannot be used as a file name",
            raw.name
        )));
    }

    let kind = parse_kind(raw.kind.as_deref())?;

    let ssh = raw.ssh.map(build_ssh).transpose()?;
    if kind != ProfileKind::Local && ssh.is_none() {
        return Err(BackupError::config(format!(
            "profile type {kind} requires ssh settings"
        )));
    }

    if raw.dirs.is_empty() && raw.dbs.is_empty() {
        return Err(BackupError::config("nothing to backup"));
    }

    let mut targets = Vec::with_capacity(raw.dirs.len());
    for dir in raw.dirs {
        if dir.path.trim().is_empty() {
            return Err(BackupError::config("backup dir path cannot be empty"));
        }
        let name = non_empty(dir.name);
        if kind == ProfileKind::SftpSync && name.is_none() {
            return Err(BackupError::config("profile name for sync path cannot be empty"));
        }
        targets.push(BackupTarget {
            path: dir.path,
            name,
            exclude: ExcludeSet::new(&dir.exclude)?,
        });
    }

    let databases = raw
        .dbs
        .into_iter()
        .map(build_db)
        .collect::<Result<Vec<_>>>()?;

    let destination = raw
        .destination
        .ok_or_else(|| BackupError::config("destination path cannot be empty"))?;
    if destination.path.trim().is_empty() {
        return Err(BackupError::config("destination path cannot be empty"));
    }

    Ok(Profile {
        name: raw.name,
        kind,
        targets,
        databases,
        destination: Destination {
            path: expand_tilde(&destination.path),
            keep: destination.keep,
            owner: non_empty(destination.owner),
            mode: non_empty(destination.mode)
                .map(|m| parse_mode(&m))
                .transpose()?,
        },
        ssh,
        notify: raw.notify.map(build_notify).transpose()?,
    })
}

/// Parse and validate a profile from YAML text.
pub fn parse_profile(yaml: &str) -> Result<Profile> {
    let raw: RawProfile = serde_yaml::from_str(yaml)?;
    build_profile(raw)
}

/// Load a single `.yaml` profile file.
pub fn load_profile(path: &Path) -> Result<Profile> {
    if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
        return Err(BackupError::config(format!(
            "profile path {} is not a .yaml file",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    parse_profile(&content)
}

/// Result of loading every profile in a directory.
#[derive(Debug, Default)]
pub struct ProfileSet {
    pub profiles: Vec<Profile>,
    pub failures: Vec<(PathBuf, BackupError)>,
}

impl ProfileSet {
    /// One error naming every file that failed to load, if any did.
    pub fn error(&self) -> Option<BackupError> {
        if self.failures.is_empty() {
            return None;
        }
        Some(BackupError::ProfileLoad {
            files: self
                .failures
                .iter()
                .map(|(path, _)| path.display().to_string())
                .collect(),
        })
    }
}

/// Load every `*.backup.yaml` below `dir`, in path order.
///
/// Invalid files are recorded in [`ProfileSet::failures`]; the valid ones are
/// still returned. A profile whose name was already loaded from an earlier
/// file counts as invalid.
pub fn load_profiles(dir: &Path) -> Result<ProfileSet> {
    let meta = std::fs::metadata(dir).map_err(|e| {
        BackupError::precondition(format!("unable to stat {}: {e}", dir.display()))
    })?;
    if !meta.is_dir() {
        return Err(BackupError::precondition(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut set = ProfileSet::default();
    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            BackupError::execution(format!("error walking {}: {e}", dir.display()))
        })?;
        if entry.file_type().is_dir() || !entry.file_name().to_string_lossy().ends_with(PROFILE_SUFFIX) {
            continue;
        }

        let loaded = load_profile(entry.path()).and_then(|profile| match seen.get(&profile.name) {
            Some(first) => Err(BackupError::config(format!(
                "profile name {} is already used by {}",
                profile.name,
                first.display()
            ))),
            None => {
                seen.insert(profile.name.clone(), entry.path().to_path_buf());
                Ok(profile)
            }
        });

        match loaded {
            Ok(profile) => {
                tracing::debug!(file = %entry.path().display(), profile = %profile.name, "Loaded profile");
                set.profiles.push(profile);
            }
            Err(e) => {
                tracing::error!(file = %entry.path().display(), error = %e, "Unable to load profile");
                set.failures.push((entry.path().to_path_buf(), e));
            }
        }
    }

    Ok(set)
}

/// Annotated template written by `backup-runner generate`.
pub const BOILERPLATE: &str = r#"---
# schema version of this file
version: 1

# profile name, used in the archive file names
name: myService

# local: back up this machine
# remote: back up a server over ssh, the archive is written locally
# sftpsync: copy archives that a server produced itself into destination
type: remote

# connection settings, required for remote and sftpsync
ssh:
  # password | sshkey | sshagent
  type: sshkey
  host: server.example.com
  port: 22
  user: backup
  # used when type is password
  password: ""
  # used when type is sshkey, defaults to ~/.ssh/id_rsa
  privateKey: ~/.ssh/id_rsa
  passphrase: ""

# directories or files to back up
dirs:
  - path: /var/www/myService
    # only used by sftpsync: the profile name of the archives to copy
    name: ""
    # glob patterns matched against the full path, * also matches /
    exclude:
      - "*.log"
      - "*/cache/*"

# databases to dump into the archive
dbs:
  # mysql | mariadb | postgres | dockermysql | dockermariadb | dockerpostgres
  - name: myservice
    type: mysql
    # required for the docker* types
    containerName: ""
    user: backup
    password: secret

# where archives are written, always on this machine
destination:
  path: /backups/myService
  # how many archives of this profile to keep, 0 keeps all
  keep: 3
  # owner and mode applied to new archives
  owner: backup
  mode: "0600"

# e-mail on failure, and on success when onSuccess is set
notify:
  host: smtp.example.com
  port: 587
  user: alerts@example.com
  password: secret
  from: alerts@example.com
  to:
    - ops@example.com
  onSuccess: false
"#;
