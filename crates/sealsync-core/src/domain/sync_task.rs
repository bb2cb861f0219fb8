//! Bulk synchronization direction

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which side of the mirror is the source of a bulk sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Local tree is authoritative, remote is made to match it
    LocalToRemote,
    /// Remote tree is authoritative, local is made to match it
    RemoteToLocal,
}

impl SyncDirection {
    /// All directions, in a fixed order
    pub const ALL: [SyncDirection; 2] = [SyncDirection::LocalToRemote, SyncDirection::RemoteToLocal];

    /// The opposite direction
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            Self::LocalToRemote => Self::RemoteToLocal,
            Self::RemoteToLocal => Self::LocalToRemote,
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalToRemote => write!(f, "local->remote"),
            Self::RemoteToLocal => write!(f, "remote->local"),
        }
    }
}
