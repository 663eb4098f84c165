//! Utility modules for the backup runner.

pub mod errors;
pub mod logger;
pub mod paths;

pub use errors::{BackupError, Result};
