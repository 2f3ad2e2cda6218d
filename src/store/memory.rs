use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{FlushRecord, RecordStore, StoredRecord};
use crate::error::StoreError;

/// In-process record store. Used by tests and by `GEAR_HITS_REDIS_URL=memory`.
///
/// Can be switched offline to simulate a store outage: while unavailable,
/// both operations fail with [`StoreError::Unavailable`] and nothing is
/// written.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    offline: AtomicBool,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    records: Vec<StoredRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Appends a record with a caller-chosen timestamp, bypassing any gear.
    pub fn push(&self, instance_id: &str, hits: u64, timestamp: i64) -> StoredRecord {
        self.inner.lock().push(&FlushRecord {
            instance_id: instance_id.to_string(),
            hits,
            timestamp,
        })
    }

    /// Every record written so far, in insertion order.
    pub fn records(&self) -> Vec<StoredRecord> {
        self.inner.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }
}

impl Inner {
    fn push(&mut self, record: &FlushRecord) -> StoredRecord {
        self.next_id += 1;
        let stored = StoredRecord::new(self.next_id, record);
        self.records.push(stored.clone());
        stored
    }
}

impl RecordStore for MemoryStore {
    async fn insert(&self, record: &FlushRecord) -> Result<StoredRecord, StoreError> {
        self.check_available()?;
        Ok(self.inner.lock().push(record))
    }

    async fn range_query(&self, since_ms: i64) -> Result<Vec<StoredRecord>, StoreError> {
        self.check_available()?;
        let mut matched: Vec<StoredRecord> = self
            .inner
            .lock()
            .records
            .iter()
            .filter(|r| r.timestamp > since_ms)
            .cloned()
            .collect();
        matched.sort_by_key(|r| (r.timestamp, r.id));
        Ok(matched)
    }
}
