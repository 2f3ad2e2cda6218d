pub mod memory;
pub mod redis_client;

use std::future::Future;

use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;
pub use redis_client::RedisStore;

use crate::error::StoreError;

/// One flush event of one gear, as handed to the store.
///
/// Field names on the wire are those of the `hitTracker` collection
/// (`gear`, `hits`, `time`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushRecord {
    #[serde(rename = "gear")]
    pub instance_id: String,
    pub hits: u64,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "time")]
    pub timestamp: i64,
}

/// A [`FlushRecord`] after the store assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: u64,
    #[serde(rename = "gear")]
    pub instance_id: String,
    pub hits: u64,
    #[serde(rename = "time")]
    pub timestamp: i64,
}

impl StoredRecord {
    pub fn new(id: u64, record: &FlushRecord) -> Self {
        Self {
            id,
            instance_id: record.instance_id.clone(),
            hits: record.hits,
            timestamp: record.timestamp,
        }
    }
}

/// Append-only collection of flush records shared by every gear.
///
/// Both calls may block on a remote store and may fail transiently; callers
/// get the failure back unchanged.
pub trait RecordStore: Send + Sync + 'static {
    /// Appends one record and returns it with its store-assigned id.
    fn insert(
        &self,
        record: &FlushRecord,
    ) -> impl Future<Output = Result<StoredRecord, StoreError>> + Send;

    /// Returns every record with `timestamp > since_ms`, ascending by
    /// `(timestamp, id)`.
    fn range_query(
        &self,
        since_ms: i64,
    ) -> impl Future<Output = Result<Vec<StoredRecord>, StoreError>> + Send;
}
