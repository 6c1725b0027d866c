// src/core/health_monitor.rs

//! The Health Monitor (C7, §4.7): runs in parallel with the replication
//! loop. Tracks consecutive non-response seconds per worker per service,
//! elects at most one eviction candidate, and coordinates with the
//! replication loop through [`crate::core::replication_loop::StopReplicationFlag`]
//! before running `DeleteWorkerJob`.

use crate::core::controller::Controller;
use crate::core::metrics::{WORKERS_TOTAL, WORKER_EVICTIONS_TOTAL, WORKER_SILENT_SECONDS};
use crate::core::replication_loop::{FailedFlag, StopReplicationFlag};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct HealthMonitorConfig {
    pub health_probe_interval: Duration,
    pub worker_response_timeout: Duration,
    pub worker_evict_timeout: Duration,
    pub permanent_delete_on_evict: bool,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            health_probe_interval: Duration::from_secs(30),
            worker_response_timeout: Duration::from_secs(30),
            worker_evict_timeout: Duration::from_secs(60),
            permanent_delete_on_evict: false,
        }
    }
}

#[derive(Default, Clone, Copy)]
struct Counters {
    qserv_silent_secs: u64,
    replication_silent_secs: u64,
}

pub async fn run_health_monitor(
    controller: Arc<Controller>,
    stop_replication: Arc<StopReplicationFlag>,
    loop_stop_requested: Arc<AtomicBool>,
    failed: Arc<FailedFlag>,
    cfg: HealthMonitorConfig,
) {
    let mut counters: HashMap<String, Counters> = HashMap::new();

    loop {
        let probe_result = match controller.cluster_health(cfg.worker_response_timeout).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "health monitor: cluster-health job failed, marking failed");
                failed.raise();
                loop_stop_requested.store(true, Ordering::SeqCst);
                return;
            }
        };

        let workers = controller.config.all_workers();
        let mut enabled_rw = 0i64;
        let mut enabled_ro = 0i64;
        let mut disabled = 0i64;
        for worker in &workers {
            if !worker.is_enabled {
                disabled += 1;
            } else if worker.is_read_only {
                enabled_ro += 1;
            } else {
                enabled_rw += 1;
            }
        }
        WORKERS_TOTAL.with_label_values(&["true", "false"]).set(enabled_rw as f64);
        WORKERS_TOTAL.with_label_values(&["true", "true"]).set(enabled_ro as f64);
        WORKERS_TOTAL.with_label_values(&["false", "false"]).set(disabled as f64);

        for worker in &workers {
            let entry = counters.entry(worker.name.clone()).or_default();
            let qserv_ok = probe_result.qserv_responded.get(&worker.name).copied().unwrap_or(false);
            let replication_ok = probe_result.replication_responded.get(&worker.name).copied().unwrap_or(false);

            entry.qserv_silent_secs = if qserv_ok {
                0
            } else {
                entry.qserv_silent_secs + cfg.worker_response_timeout.as_secs()
            };
            entry.replication_silent_secs = if replication_ok {
                0
            } else {
                entry.replication_silent_secs + cfg.worker_response_timeout.as_secs()
            };

            WORKER_SILENT_SECONDS
                .with_label_values(&[&worker.name, "qserv"])
                .set(entry.qserv_silent_secs as f64);
            WORKER_SILENT_SECONDS
                .with_label_values(&[&worker.name, "replication"])
                .set(entry.replication_silent_secs as f64);
        }

        let evict_secs = cfg.worker_evict_timeout.as_secs();
        let candidates: Vec<String> = counters
            .iter()
            .filter(|(_, c)| c.qserv_silent_secs >= evict_secs && c.replication_silent_secs >= evict_secs)
            .map(|(w, _)| w.clone())
            .collect();
        let offline_replication = counters.values().filter(|c| c.replication_silent_secs >= evict_secs).count();

        match candidates.len() {
            0 => {
                if offline_replication == 0 {
                    tokio::time::sleep(cfg.health_probe_interval).await;
                } else {
                    // Proceed immediately to the next iteration; do not
                    // skew the probe interval (§4.7 step 3, branch 0).
                }
            }
            1 if offline_replication == 1 => {
                let candidate = candidates[0].clone();
                info!(worker = %candidate, "health monitor: electing worker for eviction");

                // The single required rendezvous with the replication loop
                // (§5): raise stopReplication, wait for the loop to clear
                // it, only then run DeleteWorkerJob.
                stop_replication.raise();
                stop_replication.wait_cleared().await;

                match controller.delete_worker(&candidate, cfg.permanent_delete_on_evict).await {
                    Ok(result) => {
                        WORKER_EVICTIONS_TOTAL.inc();
                        info!(
                            worker = %candidate,
                            orphan_chunks = result.orphan_chunks.len(),
                            "health monitor: eviction complete"
                        );
                    }
                    Err(e) => {
                        warn!(worker = %candidate, error = %e, "health monitor: delete-worker job failed");
                    }
                }

                // The worker set changed: reset counters and ask the
                // replication loop to restart (§4.7 step 3).
                counters.clear();
            }
            n => {
                warn!(
                    candidates = n,
                    offline_replication,
                    "health monitor: too many workers offline, no automated eviction"
                );
            }
        }

        if failed.is_raised() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_requires_exactly_one_candidate_and_matching_offline_count() {
        // Table-driven check of the branch selection in §4.7 step 3,
        // independent of the async monitor loop.
        let cases: &[(usize, usize, bool)] = &[
            (0, 0, false),
            (0, 1, false),
            (1, 1, true),
            (1, 2, false),
            (2, 2, false),
        ];
        for &(candidates, offline_replication, should_evict) in cases {
            let evicts = candidates == 1 && offline_replication == 1;
            assert_eq!(evicts, should_evict, "candidates={candidates} offline={offline_replication}");
        }
    }
}
