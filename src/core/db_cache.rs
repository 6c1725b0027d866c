// src/core/db_cache.rs

//! The database-services cache (§4.5): persisted replica and transaction
//! state, accessed through its own serializable interface (§5) so the
//! replication loop, ingest endpoints, and jobs never race each other on a
//! single replica row. Built on `parking_lot::Mutex` guarding a plain
//! in-memory map, matching the teacher's convention of a single exclusive
//! critical section per mutating call rather than fine-grained locking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaStatus {
    Complete,
    Incomplete,
    Corrupt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaInfo {
    pub database: String,
    pub chunk: i32,
    pub worker: String,
    pub status: ReplicaStatus,
    pub verify_time: DateTime<Utc>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Started,
    Finished,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: u32,
    pub database: String,
    pub state: TransactionState,
}

#[derive(Debug, Default)]
struct CacheInner {
    replicas: BTreeMap<(String, i32, String), ReplicaInfo>,
    transactions: BTreeMap<u32, Transaction>,
    next_transaction_id: u32,
}

/// Replica and transaction state persisted alongside the configuration,
/// but mutated at much higher frequency (every `FindAllJob` wave, every
/// `add-chunk`). Kept as its own component rather than folded into
/// [`crate::config::ConfigurationStore`] so a single mutex never serializes
/// both configuration changes and per-chunk bookkeeping.
#[derive(Debug, Default)]
pub struct DbServicesCache {
    inner: parking_lot::Mutex<CacheInner>,
}

impl DbServicesCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_replica(&self, info: ReplicaInfo) {
        let mut inner = self.inner.lock();
        let key = (info.database.clone(), info.chunk, info.worker.clone());
        inner.replicas.insert(key, info);
    }

    pub fn remove_replica(&self, database: &str, chunk: i32, worker: &str) -> bool {
        let mut inner = self.inner.lock();
        inner
            .replicas
            .remove(&(database.to_string(), chunk, worker.to_string()))
            .is_some()
    }

    pub fn replica(&self, database: &str, chunk: i32, worker: &str) -> Option<ReplicaInfo> {
        self.inner
            .lock()
            .replicas
            .get(&(database.to_string(), chunk, worker.to_string()))
            .cloned()
    }

    pub fn replicas_for_database(&self, database: &str) -> Vec<ReplicaInfo> {
        self.inner
            .lock()
            .replicas
            .values()
            .filter(|r| r.database == database)
            .cloned()
            .collect()
    }

    pub fn replicas_for_chunk(&self, database: &str, chunk: i32) -> Vec<ReplicaInfo> {
        self.inner
            .lock()
            .replicas
            .values()
            .filter(|r| r.database == database && r.chunk == chunk)
            .cloned()
            .collect()
    }

    pub fn replicas_for_worker(&self, worker: &str) -> Vec<ReplicaInfo> {
        self.inner
            .lock()
            .replicas
            .values()
            .filter(|r| r.worker == worker)
            .cloned()
            .collect()
    }

    /// Number of distinct `(database, chunk)` replicas held by `worker`,
    /// used by destination/victim selection (§4.4.2, §4.4.3).
    pub fn occupancy(&self, worker: &str) -> usize {
        self.inner.lock().replicas.values().filter(|r| r.worker == worker).count()
    }

    pub fn begin_transaction(&self, database: &str) -> u32 {
        let mut inner = self.inner.lock();
        inner.next_transaction_id += 1;
        let id = inner.next_transaction_id;
        inner.transactions.insert(
            id,
            Transaction {
                id,
                database: database.to_string(),
                state: TransactionState::Started,
            },
        );
        id
    }

    pub fn end_transaction(&self, id: u32, abort: bool) -> Option<Transaction> {
        let mut inner = self.inner.lock();
        let transaction = inner.transactions.get_mut(&id)?;
        transaction.state = if abort {
            TransactionState::Aborted
        } else {
            TransactionState::Finished
        };
        Some(transaction.clone())
    }

    pub fn transaction(&self, id: u32) -> Option<Transaction> {
        self.inner.lock().transactions.get(&id).cloned()
    }

    pub fn open_transactions(&self, database: &str) -> Vec<Transaction> {
        self.inner
            .lock()
            .transactions
            .values()
            .filter(|t| t.database == database && t.state == TransactionState::Started)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(database: &str, chunk: i32, worker: &str, status: ReplicaStatus) -> ReplicaInfo {
        ReplicaInfo {
            database: database.to_string(),
            chunk,
            worker: worker.to_string(),
            status,
            verify_time: Utc::now(),
            size_bytes: 0,
        }
    }

    #[test]
    fn upsert_then_remove_round_trips() {
        let cache = DbServicesCache::new();
        cache.upsert_replica(replica("dx", 7, "A", ReplicaStatus::Complete));
        assert!(cache.replica("dx", 7, "A").is_some());
        assert!(cache.remove_replica("dx", 7, "A"));
        assert!(cache.replica("dx", 7, "A").is_none());
        assert!(!cache.remove_replica("dx", 7, "A"));
    }

    #[test]
    fn begin_end_transaction_lifecycle() {
        let cache = DbServicesCache::new();
        let id = cache.begin_transaction("dx");
        assert_eq!(cache.open_transactions("dx").len(), 1);
        let transaction = cache.end_transaction(id, true).unwrap();
        assert_eq!(transaction.state, TransactionState::Aborted);
        assert_eq!(cache.open_transactions("dx").len(), 0);
    }

    #[test]
    fn occupancy_counts_per_worker() {
        let cache = DbServicesCache::new();
        cache.upsert_replica(replica("dx", 1, "A", ReplicaStatus::Complete));
        cache.upsert_replica(replica("dx", 2, "A", ReplicaStatus::Complete));
        cache.upsert_replica(replica("dy", 1, "A", ReplicaStatus::Complete));
        cache.upsert_replica(replica("dx", 1, "B", ReplicaStatus::Complete));
        assert_eq!(cache.occupancy("A"), 3);
        assert_eq!(cache.occupancy("B"), 1);
    }
}
