// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lifecycle trigger: decides *when* the queue drains.
//!
//! ```text
//! app start ──startup_delay──────────────→ force_sync
//! offline → online ──settle_delay─────────→ force_sync   (re-armed on flapping)
//! online → offline ───────────────────────→ log only
//! every periodic_interval (online, idle) ─→ force_sync
//! ```
//!
//! All drains go through [`SyncQueue::force_sync`], so a trigger firing
//! while a pass is running is a no-op.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::SyncQueueConfig;
use crate::queue::SyncQueue;

/// Far enough away to never fire; used to park disarmed timers.
const PARKED: Duration = Duration::from_secs(60 * 60 * 24 * 365);

pub struct SyncTrigger;

impl SyncTrigger {
    /// Spawn the trigger loop for `queue` with the timings from `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(queue: Arc<SyncQueue>, config: &SyncQueueConfig) -> TriggerHandle {
        let mut online_rx = queue.connectivity();
        // Mark the current value seen now so a transition right after spawn is not lost
        let initially_online = *online_rx.borrow_and_update();

        let startup_delay = config.startup_delay();
        let settle_delay = config.settle_delay();
        let periodic = config.periodic_interval().map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut was_online = initially_online;
            let mut watching = true;
            let mut periodic = periodic;

            let startup = sleep(startup_delay);
            tokio::pin!(startup);
            let mut startup_armed = true;

            let settle = sleep(PARKED);
            tokio::pin!(settle);
            let mut settle_armed = false;

            info!(
                online = initially_online,
                startup_ms = startup_delay.as_millis() as u64,
                "Sync trigger started"
            );

            loop {
                tokio::select! {
                    // Explicit shutdown or handle dropped
                    _ = &mut shutdown_rx => break,

                    changed = online_rx.changed(), if watching => {
                        if changed.is_err() {
                            debug!("Connectivity sender dropped, no longer watching");
                            watching = false;
                            continue;
                        }
                        let online = *online_rx.borrow_and_update();
                        if online && !was_online {
                            info!(settle_ms = settle_delay.as_millis() as u64, "Back online, draining after settle delay");
                            settle.as_mut().reset(Instant::now() + settle_delay);
                            settle_armed = true;
                        } else if !online && was_online {
                            info!("Went offline, queued items will wait");
                            settle_armed = false;
                        }
                        was_online = online;
                    }

                    _ = &mut startup, if startup_armed => {
                        startup_armed = false;
                        fire(&queue, "startup");
                    }

                    _ = &mut settle, if settle_armed => {
                        settle_armed = false;
                        fire(&queue, "reconnect");
                    }

                    _ = next_tick(&mut periodic) => {
                        if queue.is_online() && !queue.is_processing() {
                            fire(&queue, "periodic");
                        }
                    }
                }
            }

            debug!("Sync trigger stopped");
        });

        TriggerHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

fn fire(queue: &Arc<SyncQueue>, trigger: &'static str) {
    let started = queue.force_sync();
    debug!(trigger, started, "Drain trigger fired");
}

/// Resolves on the next tick, or never when periodic draining is disabled.
fn next_tick(interval: &mut Option<Interval>) -> impl Future<Output = ()> + '_ {
    async move {
        match interval {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

/// Owner of a running trigger loop. Dropping it also stops the loop.
pub struct TriggerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TriggerHandle {
    /// Stop the loop and wait for it to exit. A pass already started keeps running.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
