use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use crate::error::{Result, TelemetryError};
use crate::record::TelemetryRecord;

/// Unbounded FIFO between the ingestion side and the preprocessor.
///
/// Producers hold a [`RecordSender`]; the queue itself is owned by the single
/// consumer. Enqueueing never blocks.
pub struct RecordQueue {
    tx: Sender<TelemetryRecord>,
    rx: Receiver<TelemetryRecord>,
}

#[derive(Debug, Clone)]
pub struct RecordSender {
    tx: Sender<TelemetryRecord>,
}

impl RecordQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> RecordSender {
        RecordSender {
            tx: self.tx.clone(),
        }
    }

    /// Removes the oldest record, if any, without waiting.
    pub fn try_dequeue(&self) -> Option<TelemetryRecord> {
        match self.rx.try_recv() {
            Ok(record) => Some(record),
            // The queue keeps its own sender, so it never disconnects.
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl Default for RecordQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordSender {
    pub fn enqueue(&self, record: TelemetryRecord) -> Result<()> {
        self.tx.send(record).map_err(|_| TelemetryError::QueueClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Position;
    use std::thread;

    fn record(ts: f64) -> TelemetryRecord {
        TelemetryRecord {
            position: Position {
                x: 0.0,
                y: 0.0,
                z: 0.0,
            },
            timestamp: ts,
            measurements: Default::default(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = RecordQueue::new();
        let tx = queue.sender();
        for ts in [1.0, 2.0, 3.0] {
            tx.enqueue(record(ts)).unwrap();
        }
        let got: Vec<f64> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(got, [1.0, 2.0, 3.0]);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_many_producers() {
        let queue = RecordQueue::new();
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let tx = queue.sender();
                thread::spawn(move || {
                    for i in 0..50 {
                        tx.enqueue(record((p * 100 + i) as f64)).unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        assert_eq!(std::iter::from_fn(|| queue.try_dequeue()).count(), 200);
    }

    #[test]
    fn test_enqueue_after_consumer_dropped() {
        let queue = RecordQueue::new();
        let tx = queue.sender();
        drop(queue);
        assert!(matches!(tx.enqueue(record(0.0)), Err(TelemetryError::QueueClosed)));
    }
}
