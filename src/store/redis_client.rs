use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{FlushRecord, RecordStore, StoredRecord};
use crate::error::StoreError;

/// Record store backed by one Redis sorted set.
///
/// Layout:
///   `<prefix>:records`  ZSET, member = JSON [`StoredRecord`], score = timestamp ms
///   `<prefix>:next_id`  INCR counter for record ids
///
/// `ConnectionManager` is cheaply cloneable and reconnects on failure, so
/// every call clones it instead of pooling.
pub struct RedisStore {
    conn: ConnectionManager,
    records_key: String,
    ids_key: String,
}

impl RedisStore {
    /// Opens the connection. Any failure here is a startup error.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        tracing::info!(url = %url, prefix = %prefix, "Connected to Redis record store");

        Ok(Self::with_connection(conn, prefix))
    }

    pub fn with_connection(conn: ConnectionManager, prefix: &str) -> Self {
        Self {
            conn,
            records_key: format!("{prefix}:records"),
            ids_key: format!("{prefix}:next_id"),
        }
    }
}

impl RecordStore for RedisStore {
    async fn insert(&self, record: &FlushRecord) -> Result<StoredRecord, StoreError> {
        let mut conn = self.conn.clone();

        let id: u64 = conn.incr(&self.ids_key, 1u64).await?;
        let stored = StoredRecord::new(id, record);
        let member = serde_json::to_string(&stored)?;

        let _: () = conn
            .zadd(&self.records_key, member, record.timestamp)
            .await?;

        Ok(stored)
    }

    async fn range_query(&self, since_ms: i64) -> Result<Vec<StoredRecord>, StoreError> {
        let mut conn = self.conn.clone();

        // "(" makes the lower bound exclusive
        let members: Vec<String> = conn
            .zrangebyscore(&self.records_key, format!("({since_ms}"), "+inf")
            .await?;

        let mut records = members
            .iter()
            .map(|m| serde_json::from_str::<StoredRecord>(m))
            .collect::<Result<Vec<_>, _>>()?;
        // ZSET ties are ordered by member bytes, not by id
        records.sort_by_key(|r| (r.timestamp, r.id));

        Ok(records)
    }
}
