//! Lifecycle stages of a single profile run.

use std::fmt;

/// Where a profile run is, or where it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Pending,
    PreparingDestination,
    Collecting,
    AdjustingOwnership,
    Expurging,
    Notified,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Pending => "pending",
            Stage::PreparingDestination => "preparing destination",
            Stage::Collecting => "collecting",
            Stage::AdjustingOwnership => "adjusting ownership",
            Stage::Expurging => "expurging",
            Stage::Notified => "notified",
        })
    }
}
