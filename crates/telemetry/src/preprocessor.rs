use log::{info, warn};
use utils::Worker;

use crate::error::{Result, TelemetryError};
use crate::queue::{RecordQueue, RecordSender};
use crate::record::TelemetryRecord;
use crate::store::PersistentStore;

/// Drains the record queue into the persistent store, one record per cycle.
pub struct Preprocessor {
    queue: RecordQueue,
    store: PersistentStore,
    written: u64,
    dropped: u64,
}

impl Preprocessor {
    /// Prepares the store (creating it with its header if needed) and an empty queue.
    pub fn new(store: PersistentStore) -> Result<Self> {
        store.prepare()?;
        info!("[Preprocessor] writing to {}", store.path().display());
        Ok(Self {
            queue: RecordQueue::new(),
            store,
            written: 0,
            dropped: 0,
        })
    }

    /// Handle for producers running on other threads or tasks.
    pub fn sender(&self) -> RecordSender {
        self.queue.sender()
    }

    pub fn enqueue(&self, record: TelemetryRecord) -> Result<()> {
        self.queue.sender().enqueue(record)
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Persists the oldest queued record. Returns `Ok(false)` when the queue was
    /// empty or the record was malformed and dropped.
    pub fn process_next(&mut self) -> Result<bool> {
        let Some(record) = self.queue.try_dequeue() else {
            return Ok(false);
        };

        match record.to_row(self.store.num_beacons()) {
            Ok(row) => {
                self.store.append(&row)?;
                self.written += 1;
                Ok(true)
            }
            Err(TelemetryError::MalformedRecord(reason)) => {
                self.dropped += 1;
                warn!("[Preprocessor] dropping record at t={}: {}", record.timestamp, reason);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

impl Worker for Preprocessor {
    type Error = TelemetryError;

    fn name(&self) -> &str {
        "Preprocessor"
    }

    fn work(&mut self) -> Result<()> {
        self.process_next().map(|_| ())
    }
}
