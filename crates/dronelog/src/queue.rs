//! The local queue of records awaiting sync.
//!
//! The queue is an insertion-ordered list of [`FlightEventRecord`]s kept as a
//! single JSON array under [`QUEUE_KEY`]. Every mutation rewrites the whole
//! array, so the stored document always equals the queue as of the last
//! completed operation. A missing or unreadable document reads as an empty
//! queue; the next write replaces it.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::record::FlightEventRecord;
use crate::storage::{lock, SharedStorage, Storage};

/// Storage key for the serialized queue.
pub const QUEUE_KEY: &str = "dlb_queue_v1";

/// Durable, ordered holding area for records awaiting transmission.
///
/// Cloning yields another handle to the same queue, sharing its pending-count
/// channel and its sync-in-progress flag. Stores built separately with
/// [`QueueStore::new`] over the same storage share the records but not those
/// two; build one store and clone it.
#[derive(Debug, Clone)]
pub struct QueueStore {
    storage: SharedStorage,
    pending: Arc<watch::Sender<usize>>,
    syncing: Arc<AtomicBool>,
}

impl QueueStore {
    /// Create a queue over a shared storage handle.
    #[must_use]
    pub fn new(storage: SharedStorage) -> Self {
        let initial = load(&lock(&storage)).len();
        let (pending, _) = watch::channel(initial);
        Self {
            storage,
            pending: Arc::new(pending),
            syncing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set while a sync is draining this queue.
    pub(crate) fn sync_flag(&self) -> &AtomicBool {
        &self.syncing
    }

    /// Watch the number of pending records.
    ///
    /// The receiver sees a new value after every append, clear or
    /// acknowledgement.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }

    /// Add `record` to the end of the queue and persist it.
    ///
    /// Returns the new number of pending records.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be written. The stored queue is
    /// unchanged in that case.
    pub fn append(&self, record: FlightEventRecord) -> Result<usize> {
        let storage = lock(&self.storage);
        let mut queue = load(&storage);
        queue.push(record);
        persist(&storage, &queue)?;
        Ok(self.publish(queue.len()))
    }

    /// All pending records in insertion order.
    #[must_use]
    pub fn read_all(&self) -> Vec<FlightEventRecord> {
        load(&lock(&self.storage))
    }

    /// Number of pending records.
    #[must_use]
    pub fn count(&self) -> usize {
        self.read_all().len()
    }

    /// Drop every pending record by deleting the stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be deleted.
    pub fn clear(&self) -> Result<()> {
        lock(&self.storage).remove(QUEUE_KEY)?;
        self.publish(0);
        info!("Queue cleared");
        Ok(())
    }

    /// Remove records the destination has accepted.
    ///
    /// `sent` must be the records at the front of the queue as they were
    /// read before sending. They are removed only if the queue still starts
    /// with exactly those records; records appended since are kept. If the
    /// queue no longer starts with `sent` (it was cleared meanwhile) nothing
    /// is removed.
    ///
    /// Returns the number of records still pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the shortened queue cannot be written.
    pub fn acknowledge(&self, sent: &[FlightEventRecord]) -> Result<usize> {
        let storage = lock(&self.storage);
        let mut queue = load(&storage);

        if sent.is_empty() {
            return Ok(queue.len());
        }

        if !queue.starts_with(sent) {
            warn!(
                acknowledged = sent.len(),
                pending = queue.len(),
                "Queue changed during sync; leaving it untouched"
            );
            return Ok(queue.len());
        }

        queue.drain(..sent.len());
        persist(&storage, &queue)?;
        debug!(acknowledged = sent.len(), remaining = queue.len(), "Acknowledged records");
        Ok(self.publish(queue.len()))
    }

    fn publish(&self, count: usize) -> usize {
        self.pending.send_replace(count);
        debug!(pending = count, "Pending count updated");
        count
    }
}

fn load(storage: &Storage) -> Vec<FlightEventRecord> {
    let raw = match storage.get(QUEUE_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!(error = %e, "Failed to read queue; treating it as empty");
            return Vec::new();
        }
    };

    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(error = %e, "Stored queue is unreadable; treating it as empty");
        Vec::new()
    })
}

fn persist(storage: &Storage, queue: &[FlightEventRecord]) -> Result<()> {
    let json = serde_json::to_string(queue)?;
    storage.set(QUEUE_KEY, &json)
}
