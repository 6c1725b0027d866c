// src/core/replication_loop.rs

//! The Replication Loop (C6, §4.6): a periodic task running
//! find -> fixup -> replicate -> rebalance -> [purge], one job per
//! database family per phase, each phase followed by a `QservSync`
//! barrier. Coordinates with the health monitor (§4.7, §5) through two
//! shared flags, `stop_requested` and `failed`.

use crate::core::controller::Controller;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// The rendezvous primitive shared between the replication loop and the
/// health monitor (§4.7, §5): a flag plus a notifier so the monitor's
/// `wait for the loop to clear it` doesn't busy-poll.
#[derive(Default)]
pub struct StopReplicationFlag {
    flag: AtomicBool,
    cleared: Notify,
}

impl StopReplicationFlag {
    pub fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
        self.cleared.notify_waiters();
    }

    /// Blocks until the loop clears the flag.
    pub async fn wait_cleared(&self) {
        if !self.is_raised() {
            return;
        }
        loop {
            let notified = self.cleared.notified();
            if !self.is_raised() {
                return;
            }
            notified.await;
            if !self.is_raised() {
                return;
            }
        }
    }
}

#[derive(Default)]
pub struct FailedFlag(AtomicBool);

impl FailedFlag {
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Configuration for one replication loop run; `num_iter == 0` means
/// "run forever" (§4.6).
pub struct ReplicationLoopConfig {
    pub replication_interval: Duration,
    pub qserv_sync_timeout: Duration,
    pub num_iter: u64,
    pub purge_enabled: bool,
}

impl Default for ReplicationLoopConfig {
    fn default() -> Self {
        Self {
            replication_interval: Duration::from_secs(60),
            qserv_sync_timeout: Duration::from_secs(300),
            num_iter: 0,
            purge_enabled: true,
        }
    }
}

pub async fn run_replication_loop(
    controller: Arc<Controller>,
    stop_replication: Arc<StopReplicationFlag>,
    stop_requested: Arc<AtomicBool>,
    failed: Arc<FailedFlag>,
    cfg: ReplicationLoopConfig,
) {
    let mut completed: u64 = 0;
    loop {
        if stop_requested.load(Ordering::SeqCst) {
            info!("replication loop: stop requested, exiting");
            return;
        }
        if stop_replication.is_raised() {
            // The health monitor wants exclusive access to plan an
            // eviction; quiesce and signal readiness, then wait to be
            // asked to resume (§4.7/§5's single required rendezvous).
            info!("replication loop: stopReplication observed, quiescing");
            stop_replication.clear();
            tokio::time::sleep(Duration::from_millis(50)).await;
            continue;
        }

        let families = controller.config.all_families();
        let mut wave_failed = false;

        for family in &families {
            if stop_requested.load(Ordering::SeqCst) || stop_replication.is_raised() {
                break;
            }
            if let Err(e) = controller.find_all(&family.name, true, false).await {
                warn!(family = %family.name, error = %e, "replication loop: find-all wave failed");
                wave_failed = true;
                continue;
            }
            if let Err(e) = controller.qserv_sync(&family.name, cfg.qserv_sync_timeout).await {
                warn!(family = %family.name, error = %e, "replication loop: qserv-sync after find-all failed");
            }

            if let Err(e) = controller.fixup(&family.name).await {
                warn!(family = %family.name, error = %e, "replication loop: fixup wave failed");
            }
            let _ = controller.qserv_sync(&family.name, cfg.qserv_sync_timeout).await;

            if let Err(e) = controller.replicate(&family.name, family.min_replication_level).await {
                warn!(family = %family.name, error = %e, "replication loop: replicate wave failed");
            }
            let _ = controller.qserv_sync(&family.name, cfg.qserv_sync_timeout).await;

            if let Err(e) = controller.rebalance(&family.name, false).await {
                warn!(family = %family.name, error = %e, "replication loop: rebalance wave failed");
            }
            let _ = controller.qserv_sync(&family.name, cfg.qserv_sync_timeout).await;

            if cfg.purge_enabled {
                if let Err(e) = controller.purge(&family.name, family.min_replication_level).await {
                    warn!(family = %family.name, error = %e, "replication loop: purge wave failed");
                }
                let _ = controller.qserv_sync(&family.name, cfg.qserv_sync_timeout).await;
            }
        }

        if wave_failed {
            // A failed wave is treated as a skipped wave, not a loop
            // failure (§7): sleep and try again next iteration.
            warn!("replication loop: wave had failures, will retry next iteration");
        }

        if failed.is_raised() {
            warn!("replication loop: failed flag observed, exiting");
            return;
        }

        completed += 1;
        if cfg.num_iter != 0 && completed >= cfg.num_iter {
            return;
        }

        tokio::time::sleep(cfg.replication_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_replication_flag_wakes_waiters_on_clear() {
        let flag = Arc::new(StopReplicationFlag::default());
        flag.raise();
        let waiter_flag = Arc::clone(&flag);
        let waiter = tokio::spawn(async move {
            waiter_flag.wait_cleared().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        flag.clear();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }
}
