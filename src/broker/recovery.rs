// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Supervised background recovery loop.
//!
//! Each tick probes both stores, refreshes gauges, and drains the deferred
//! queue when at least one store is reachable. The interval backs off to
//! the configured maximum after a pass that makes no progress (so a dead
//! store is not hammered) and resets to the base interval as soon as a
//! pass succeeds or the queue is empty.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::DataBroker;

/// Handle to the spawned recovery task. Dropping it without calling
/// [`stop`](Self::stop) closes the stop channel, which the loop treats as
/// a stop signal; the task exits on its next poll.
pub struct RecoveryWorker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RecoveryWorker {
    /// Spawn the recovery loop for `broker` on the current runtime.
    pub fn spawn(broker: Arc<DataBroker>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(broker, stop_rx));
        Self { stop_tx, handle }
    }

    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

async fn run_loop(broker: Arc<DataBroker>, mut stop_rx: watch::Receiver<bool>) {
    let base = broker.config().recovery_interval();
    let max_backoff = broker.config().recovery_max_backoff();
    let jitter_ms = broker.config().recovery_jitter_ms;
    let mut delay = base;

    info!(
        interval_secs = base.as_secs(),
        max_backoff_secs = max_backoff.as_secs(),
        "Recovery worker started"
    );

    loop {
        // Jitter desynchronizes probe bursts across broker instances
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };

        tokio::select! {
            changed = stop_rx.changed() => {
                // A closed channel means the handle was dropped; stop too
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(delay + jitter) => {
                let report = broker.probe_now().await;
                broker.update_gauge_metrics();

                let pending = broker.queue().pending();
                if pending.is_empty() {
                    delay = base;
                    continue;
                }
                // Gate on the store each operation actually replays
                // against: draining while that store is down would only
                // burn retry budgets.
                let drainable = pending
                    .iter()
                    .any(|op| report.is_healthy(DataBroker::replay_store(op.kind)));
                if !drainable {
                    debug!("Target stores down, holding the queue");
                    delay = max_backoff;
                    continue;
                }

                let outcome = broker.force_sync_all_pending().await;
                if outcome.processed == 0 && outcome.failed > 0 {
                    warn!(failed = outcome.failed, "Drain pass made no progress, backing off");
                    delay = max_backoff;
                } else {
                    delay = base;
                }
            }
        }
    }

    info!("Recovery worker stopped");
}
