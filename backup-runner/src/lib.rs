//! Backup Runner Library
//!
//! Profile-driven backups: local or remote trees and database dumps are
//! streamed into one zip archive per run, old archives are expurged, and
//! archives produced elsewhere can be mirrored over SSH.

pub mod archive;
pub mod config;
pub mod dump;
pub mod executor;
pub mod fs;
pub mod notify;
pub mod process;
pub mod profile;
pub mod remote;
pub mod retention;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::Runner;
pub use profile::Profile;
pub use utils::errors::{BackupError, Result};
