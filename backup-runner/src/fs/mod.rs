//! Filesystem traversal, local and remote, plus ownership fix-ups.

pub mod exclude;
pub mod metadata;
pub mod remote;
pub mod walker;
