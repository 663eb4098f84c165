//! Custom error types for the backup runner.

use crate::executor::Stage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    /// Malformed or invalid profile; only fails the load of that profile.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Something the run depends on is missing or of the wrong kind.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Non-zero exit, remote command failure, or similar runtime failure.
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("archive handle is closed")]
    ArchiveClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Mail error: {0}")]
    Mail(String),

    /// The partial archive could not be removed after a collection failure.
    #[error("unable to delete incomplete archive ({cleanup}) while handling: {cause}")]
    Cleanup {
        cause: Box<BackupError>,
        cleanup: Box<BackupError>,
    },

    #[error("profile {name} failed while {stage}: {source}")]
    Profile {
        name: String,
        stage: Stage,
        source: Box<BackupError>,
    },

    #[error("errors loading profile from files: {}", .files.join(", "))]
    ProfileLoad { files: Vec<String> },

    #[error("at least one profile failed: {}", .failed.join(", "))]
    Batch { failed: Vec<String> },
}

impl BackupError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        BackupError::Config(msg.into())
    }

    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        BackupError::Precondition(msg.into())
    }

    pub(crate) fn execution(msg: impl Into<String>) -> Self {
        BackupError::Execution(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_error_keeps_both_causes() {
        let err = BackupError::Cleanup {
            cause: Box::new(BackupError::execution("mysqldump exited with status 2")),
            cleanup: Box::new(BackupError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "permission denied",
            ))),
        };
        let msg = err.to_string();
        assert!(msg.contains("mysqldump exited with status 2"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn test_batch_error_names_failed_profiles() {
        let err = BackupError::Batch {
            failed: vec!["web".to_string(), "db".to_string()],
        };
        assert_eq!(err.to_string(), "at least one profile failed: web, db");
    }
}
