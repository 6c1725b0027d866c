// src/core/job/planning.rs

//! Shared chunk-placement bookkeeping used by `ReplicateJob`, `PurgeJob`,
//! `FixUpJob`, and `RebalanceJob`. All four plan against the same
//! `databases x chunk x worker` view of the database-services cache, so
//! the "good replica" / collocation computation (§3, §4.4.1) lives here
//! once rather than being re-derived by each job.

use crate::config::ConfigurationStore;
use crate::core::chunker::DUMMY_CHUNK_ID;
use crate::core::db_cache::{DbServicesCache, ReplicaStatus};
use crate::core::metrics::GOOD_REPLICAS;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct ChunkPlanningView {
    pub databases: Vec<String>,
    /// `chunk -> { worker with a good (complete + collocated) replica }`.
    pub good_workers: BTreeMap<i32, BTreeSet<String>>,
    /// `chunk -> { worker holding at least one replica, of any status }`.
    pub hosting_workers: BTreeMap<i32, BTreeSet<String>>,
}

/// Builds a planning view for `family` from the database-services cache,
/// excluding the dummy sentinel chunk from every set (§9).
pub fn build_planning_view(config: &ConfigurationStore, db_cache: &DbServicesCache, family: &str) -> ChunkPlanningView {
    let databases: Vec<String> = config.databases_in_family(family).into_iter().map(|d| d.name).collect();

    let mut per_chunk_per_database_workers: BTreeMap<i32, BTreeMap<&str, BTreeSet<String>>> = BTreeMap::new();
    let mut hosting_workers: BTreeMap<i32, BTreeSet<String>> = BTreeMap::new();

    for database in &databases {
        for replica in db_cache.replicas_for_database(database) {
            if replica.chunk == DUMMY_CHUNK_ID {
                continue;
            }
            hosting_workers.entry(replica.chunk).or_default().insert(replica.worker.clone());
            if replica.status == ReplicaStatus::Complete {
                per_chunk_per_database_workers
                    .entry(replica.chunk)
                    .or_default()
                    .entry(database.as_str())
                    .or_default()
                    .insert(replica.worker.clone());
            }
        }
    }

    let mut good_workers: BTreeMap<i32, BTreeSet<String>> = BTreeMap::new();
    for (chunk, per_database) in &per_chunk_per_database_workers {
        // A worker is good for this chunk iff it has a COMPLETE replica in
        // every database of the family that actually hosts the chunk.
        let databases_with_chunk: Vec<&str> = per_database.keys().copied().collect();
        let mut candidates: Option<BTreeSet<String>> = None;
        for database in &databases_with_chunk {
            let workers = per_database.get(database).cloned().unwrap_or_default();
            candidates = Some(match candidates {
                None => workers,
                Some(acc) => acc.intersection(&workers).cloned().collect(),
            });
        }
        good_workers.insert(*chunk, candidates.unwrap_or_default());
    }

    let good_replica_count: usize = good_workers.values().map(BTreeSet::len).sum();
    GOOD_REPLICAS.with_label_values(&[family]).set(good_replica_count as f64);

    ChunkPlanningView {
        databases,
        good_workers,
        hosting_workers,
    }
}

/// Picks the writable (`enabled && !readOnly`) worker with the least total
/// chunk occupancy across the family that does not already host `chunk`;
/// ties broken lexicographically (§4.4.2).
pub fn least_loaded_destination(
    config: &ConfigurationStore,
    db_cache: &DbServicesCache,
    chunk: i32,
    view: &ChunkPlanningView,
) -> Option<String> {
    let hosting = view.hosting_workers.get(&chunk).cloned().unwrap_or_default();
    let writable = config.workers(true, false);
    writable
        .into_iter()
        .filter(|w| !hosting.contains(w))
        .map(|w| {
            let occupancy = db_cache.occupancy(&w);
            (occupancy, w)
        })
        .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, w)| w)
}

/// Picks any worker currently holding a good replica of `chunk`, for use
/// as a replication source (§4.4.2).
pub fn any_good_source(view: &ChunkPlanningView, chunk: i32) -> Option<String> {
    view.good_workers.get(&chunk).and_then(|set| set.iter().next().cloned())
}
