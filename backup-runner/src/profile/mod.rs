//! Backup profiles: what to collect, from where, and where to put it.
//!
//! Profiles are read from YAML files by [`loader`] and are immutable once
//! validated.

pub mod loader;

use crate::dump::DbEngine;
use crate::fs::exclude::ExcludeSet;
use std::fmt;
use std::path::PathBuf;

pub use loader::{load_profile, load_profiles, ProfileSet, BOILERPLATE, PROFILE_SUFFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    /// Collect from this machine.
    Local,
    /// Collect over SSH; the archive is still written locally.
    Remote,
    /// Mirror archives produced elsewhere; no archive is created.
    SftpSync,
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProfileKind::Local => "local",
            ProfileKind::Remote => "remote",
            ProfileKind::SftpSync => "sftpsync",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupTarget {
    pub path: String,
    /// Correlation name of mirrored archives (sync profiles only).
    pub name: Option<String>,
    pub exclude: ExcludeSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    pub name: String,
    pub engine: DbEngine,
    pub user: Option<String>,
    pub password: Option<String>,
    pub container: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub path: PathBuf,
    /// Number of archives to retain; 0 disables retention.
    pub keep: usize,
    pub owner: Option<String>,
    pub mode: Option<u32>,
}

#[derive(Clone, PartialEq, Eq)]
pub enum SshAuth {
    Password(String),
    Key {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Agent,
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::Password(_) => f.write_str("Password(***)"),
            SshAuth::Key { path, .. } => f.debug_struct("Key").field("path", path).finish(),
            SshAuth::Agent => f.write_str("Agent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSpec {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: SshAuth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifySpec {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    /// Also mail when the profile succeeds.
    pub on_success: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub kind: ProfileKind,
    pub targets: Vec<BackupTarget>,
    pub databases: Vec<DatabaseTarget>,
    pub destination: Destination,
    pub ssh: Option<SshSpec>,
    pub notify: Option<NotifySpec>,
}
