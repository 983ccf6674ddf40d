//! Configuration types for TIDEMARK

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How many committed versions stay queryable before pruning
pub const DEFAULT_HISTORY_SIZE: u64 = 10;

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Application name returned from Info
    pub name: String,

    /// Versioned-tree storage directory. `None` keeps everything in
    /// memory, for tests and tooling.
    pub db_path: Option<PathBuf>,

    /// Number of recent versions guaranteed queryable; older versions
    /// may be pruned.
    pub history_size: u64,
}

impl StoreConfig {
    /// Volatile store with no persistence.
    pub fn in_memory(name: &str) -> Self {
        Self {
            name: name.to_string(),
            db_path: None,
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }

    /// Store persisted under the given directory.
    pub fn persistent(name: &str, db_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            db_path: Some(db_path.into()),
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "tidemark".to_string(),
            db_path: Some(PathBuf::from("./data/state")),
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }
}
