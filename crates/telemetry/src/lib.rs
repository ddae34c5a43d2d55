pub mod error;
pub mod preprocessor;
pub mod queue;
pub mod record;
pub mod store;

pub use error::TelemetryError;
pub use preprocessor::Preprocessor;
pub use queue::{RecordQueue, RecordSender};
pub use record::{PersistedRow, Position, TelemetryRecord};
pub use store::{PersistentStore, Table};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// CSV file holding every persisted row.
    pub path: PathBuf,
    /// Number of beacon columns; fixed for the lifetime of the store.
    pub num_beacons: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/preprocessed.csv"),
            num_beacons: 4,
        }
    }
}

impl StoreConfig {
    pub fn open(&self) -> PersistentStore {
        PersistentStore::new(&self.path, self.num_beacons)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessorConfig {
    /// Idle time between two queue polls.
    pub wait_time_ms: u64,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self { wait_time_ms: 10 }
    }
}
