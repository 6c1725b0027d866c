// src/core/locker.rs

//! The process-wide chunk lock registry (C3): `(family, chunk) -> jobId`.
//!
//! This is the only serialization point between concurrent jobs that mutate
//! the same chunk (§4.3, §5). Built on `dashmap`, following the teacher's
//! use of `DashMap` for concurrent registries that are read far more often
//! than written and never held across an `.await`.

use crate::core::metrics::{CHUNK_LOCKS_HELD, CHUNK_LOCK_CONTENTION_TOTAL};
use dashmap::DashMap;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OwnedChunkKey {
    family: String,
    chunk: i32,
}

#[derive(Debug, Default)]
pub struct ChunkLocker {
    locks: DashMap<OwnedChunkKey, JobId>,
}

impl ChunkLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically acquires the lock for `(family, chunk)` on behalf of
    /// `job_id`. Returns `true` if the lock was free and is now held by
    /// `job_id`; `false` if it was already held by any job, including
    /// `job_id` itself (the locker does not support re-entrant acquisition).
    pub fn lock(&self, family: &str, chunk: i32, job_id: JobId) -> bool {
        let key = OwnedChunkKey {
            family: family.to_string(),
            chunk,
        };
        match self.locks.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                CHUNK_LOCK_CONTENTION_TOTAL.inc();
                false
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(job_id);
                CHUNK_LOCKS_HELD.inc();
                true
            }
        }
    }

    /// Releases `(family, chunk)` unconditionally. Idempotent.
    pub fn release(&self, family: &str, chunk: i32) {
        let key = OwnedChunkKey {
            family: family.to_string(),
            chunk,
        };
        if self.locks.remove(&key).is_some() {
            CHUNK_LOCKS_HELD.dec();
        }
    }

    /// Releases every chunk currently held by `job_id`. Idempotent.
    pub fn release_by_job(&self, job_id: JobId) {
        let mut released = 0i64;
        self.locks.retain(|_, owner| {
            let keep = *owner != job_id;
            if !keep {
                released += 1;
            }
            keep
        });
        CHUNK_LOCKS_HELD.sub(released as f64);
    }

    /// All `(family, chunk)` pairs currently held by `job_id`.
    pub fn locked_by(&self, job_id: JobId) -> Vec<(String, i32)> {
        self.locks
            .iter()
            .filter(|entry| *entry.value() == job_id)
            .map(|entry| (entry.key().family.clone(), entry.key().chunk))
            .collect()
    }

    /// All currently held `(family, chunk, ownerJobId)` triples.
    pub fn locked(&self) -> Vec<(String, i32, JobId)> {
        self.locks
            .iter()
            .map(|entry| (entry.key().family.clone(), entry.key().chunk, *entry.value()))
            .collect()
    }

    pub fn is_locked(&self, family: &str, chunk: i32) -> bool {
        let key = OwnedChunkKey {
            family: family.to_string(),
            chunk,
        };
        self.locks.contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_not_reentrant() {
        let locker = ChunkLocker::new();
        let job = Uuid::new_v4();
        assert!(locker.lock("layout_340_12", 7, job));
        assert!(!locker.lock("layout_340_12", 7, job));
        assert!(!locker.lock("layout_340_12", 7, Uuid::new_v4()));
    }

    #[test]
    fn release_then_lock_succeeds() {
        let locker = ChunkLocker::new();
        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();
        assert!(locker.lock("f", 1, job_a));
        locker.release("f", 1);
        assert!(locker.lock("f", 1, job_b));
    }

    #[test]
    fn release_by_job_is_idempotent_and_scoped() {
        let locker = ChunkLocker::new();
        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();
        locker.lock("f", 1, job_a);
        locker.lock("f", 2, job_a);
        locker.lock("f", 3, job_b);
        locker.release_by_job(job_a);
        locker.release_by_job(job_a);
        assert!(!locker.is_locked("f", 1));
        assert!(!locker.is_locked("f", 2));
        assert!(locker.is_locked("f", 3));
    }
}
