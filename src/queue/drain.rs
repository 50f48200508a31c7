// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Drain pass: replay due items through their adapters.
//!
//! One pass snapshots the active queue, then handles each due item in FIFO
//! order, strictly one at a time:
//!
//! ```text
//! item due? ──no──→ skip (stays in RetryWait)
//!    │
//!   yes → adapter for kind? ──no──→ deferred (untouched)
//!    │
//!   yes → submit (bounded by submit_timeout)
//!           ├─ Ok            → delete
//!           ├─ Fatal         → dead letter (fatal)
//!           └─ Retryable     → retries += 1
//!                                ├─ budget left → gate = now + backoff, persist
//!                                └─ exhausted   → dead letter (exhausted)
//! ```
//!
//! Per-item remote failures never abort the pass. Store failures do, and the
//! guard is released on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::adapter::{RemoteError, SubmissionAdapter, SubmissionEnvelope};
use crate::queue_item::QueueItem;
use crate::storage::traits::StorageError;

use super::api::decode_items;
use super::{
    DrainOutcome, DrainSummary, FailedItem, FailureReason, QueueError, QueueEvent, SkipReason,
    SyncQueue, FAILED_COLLECTION, QUEUE_COLLECTION,
};

/// RAII guard to reset the draining flag.
pub(super) struct DrainGuard(Arc<AtomicBool>);

impl DrainGuard {
    /// Take the flag, or `None` if a pass already holds it.
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// What happened to one attempted item.
enum Settled {
    Delivered,
    Rescheduled,
    DeadLettered(FailureReason),
}

impl SyncQueue {
    /// Run one drain pass now, waiting for it to finish.
    ///
    /// Returns [`DrainOutcome::Skipped`] without touching any item when
    /// offline or when another pass is in progress.
    #[tracing::instrument(skip(self))]
    pub async fn drain(&self) -> Result<DrainOutcome, QueueError> {
        match self.begin_pass() {
            Ok(guard) => self.run_pass(guard).await.map(DrainOutcome::Completed),
            Err(reason) => Ok(DrainOutcome::Skipped(reason)),
        }
    }

    /// Start a drain pass in the background.
    ///
    /// The guard is taken before this returns, so `true` means a pass is
    /// running (or already finished) and `false` means none was started
    /// because one is in progress or connectivity is down. Never blocks.
    pub fn force_sync(self: &Arc<Self>) -> bool {
        let guard = match self.begin_pass() {
            Ok(guard) => guard,
            Err(_) => return false,
        };

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = queue.run_pass(guard).await {
                error!(error = %e, "Background drain pass failed");
            }
        });
        true
    }

    fn begin_pass(&self) -> Result<DrainGuard, SkipReason> {
        let result = if !self.is_online() {
            Err(SkipReason::Offline)
        } else {
            DrainGuard::acquire(&self.draining).ok_or(SkipReason::AlreadyDraining)
        };

        if let Err(reason) = result.as_ref() {
            debug!(%reason, "Drain skipped");
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_drain_skipped(reason.as_str());
        }
        result
    }

    async fn run_pass(&self, _guard: DrainGuard) -> Result<DrainSummary, QueueError> {
        let start = Instant::now();
        let now = self.clock.now_ms();

        let items: Vec<QueueItem> = {
            let _timer = crate::metrics::LatencyTimer::new("get_all");
            decode_items(self.store.get_all(&QUEUE_COLLECTION).await?)
        };
        let total = items.len();
        let due: Vec<QueueItem> = items.into_iter().filter(|item| item.is_due(now)).collect();

        let mut summary = DrainSummary::default();
        if due.is_empty() {
            debug!(total, "Nothing due");
        } else {
            info!(total, due = due.len(), "Drain pass started");
        }

        for item in due {
            // Budget may already be spent if max_retries was lowered since the last run
            if self.policy.is_exhausted(item.retries) {
                self.dead_letter(item, FailureReason::Exhausted).await?;
                summary.exhausted += 1;
                continue;
            }

            let Some(adapter) = self.adapters.get(&item.kind) else {
                warn!(id = %item.id, kind = %item.kind, "No adapter registered, deferring item");
                summary.deferred += 1;
                continue;
            };

            if summary.processed > 0 && !self.config.pacing().is_zero() {
                tokio::time::sleep(self.config.pacing()).await;
            }

            let result = self.submit(adapter.as_ref(), &item).await;
            summary.processed += 1;

            match self.settle(item, result).await? {
                Settled::Delivered => summary.succeeded += 1,
                Settled::Rescheduled => summary.failed += 1,
                Settled::DeadLettered(reason) => {
                    summary.failed += 1;
                    match reason {
                        FailureReason::Exhausted => summary.exhausted += 1,
                        FailureReason::Fatal => summary.fatal += 1,
                    }
                }
            }
        }

        self.counters.passes.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_drain(summary.processed, summary.succeeded, start.elapsed());
        if summary.processed > 0 || summary.dead_lettered() > 0 {
            info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                exhausted = summary.exhausted,
                fatal = summary.fatal,
                deferred = summary.deferred,
                duration_ms = start.elapsed().as_millis() as u64,
                "Drain pass complete"
            );
        }

        self.emit(QueueEvent::Processed(summary.clone()));
        Ok(summary)
    }

    /// One adapter call, bounded by the submit timeout. A timeout is retryable.
    async fn submit(&self, adapter: &dyn SubmissionAdapter, item: &QueueItem) -> Result<(), RemoteError> {
        let envelope = SubmissionEnvelope::for_item(item);
        let timeout = self.config.submit_timeout();
        let start = Instant::now();

        let result = match tokio::time::timeout(timeout, adapter.submit(&envelope)).await {
            Ok(result) => result,
            Err(_) => {
                crate::metrics::record_attempt(item.kind.as_str(), "timeout");
                Err(RemoteError::retryable(format!(
                    "submission timed out after {}ms",
                    timeout.as_millis()
                )))
            }
        };
        crate::metrics::record_submit_latency(item.kind.as_str(), start.elapsed());
        result
    }

    /// Persist the outcome of one attempt.
    async fn settle(&self, mut item: QueueItem, result: Result<(), RemoteError>) -> Result<Settled, QueueError> {
        let kind = item.kind.as_str().to_string();

        let error = match result {
            Ok(()) => {
                // Drops a dead-letter copy left by an interrupted move
                self.store.delete(&FAILED_COLLECTION, &item.id).await?;
                self.store.delete(&QUEUE_COLLECTION, &item.id).await?;
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_attempt(&kind, "success");
                debug!(id = %item.id, kind = %kind, "Item delivered");
                return Ok(Settled::Delivered);
            }
            Err(error) => error,
        };

        self.counters.failed_attempts.fetch_add(1, Ordering::Relaxed);

        if error.is_fatal() {
            crate::metrics::record_attempt(&kind, "fatal");
            item.last_error = Some(error.reason().to_string());
            warn!(id = %item.id, kind = %kind, error = %error, "Fatal submission failure");
            self.dead_letter(item, FailureReason::Fatal).await?;
            return Ok(Settled::DeadLettered(FailureReason::Fatal));
        }

        let retries = item.retries.saturating_add(1);
        if self.policy.is_exhausted(retries) {
            crate::metrics::record_attempt(&kind, "exhausted");
            item.record_failure(error.reason(), None);
            warn!(id = %item.id, kind = %kind, retries, error = %error, "Retry budget exhausted");
            self.dead_letter(item, FailureReason::Exhausted).await?;
            return Ok(Settled::DeadLettered(FailureReason::Exhausted));
        }

        let delay = {
            let mut rng = self.rng.lock();
            self.policy.delay_for(retries, &mut *rng)
        };
        let next_at = self.clock.now_ms().saturating_add(delay.as_millis() as i64);
        item.record_failure(error.reason(), Some(next_at));

        let record = serde_json::to_value(&item).map_err(StorageError::from)?;
        self.store.put(&QUEUE_COLLECTION, &record).await?;

        crate::metrics::record_attempt(&kind, "retry");
        debug!(
            id = %item.id,
            kind = %kind,
            retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, rescheduled"
        );
        Ok(Settled::Rescheduled)
    }

    /// Move `item` to the dead-letter collection.
    ///
    /// Written there before being removed from the active queue; both writes are
    /// keyed by id, so a crash in between is repaired by the next pass, whether
    /// its attempt fails again or succeeds.
    async fn dead_letter(&self, item: QueueItem, reason: FailureReason) -> Result<(), QueueError> {
        let failed = FailedItem {
            item,
            failed_at: self.clock.now_ms(),
            reason,
        };
        let record = serde_json::to_value(&failed).map_err(StorageError::from)?;
        self.store.put(&FAILED_COLLECTION, &record).await?;
        self.store.delete(&QUEUE_COLLECTION, &failed.item.id).await?;

        match reason {
            FailureReason::Exhausted => self.counters.exhausted.fetch_add(1, Ordering::Relaxed),
            FailureReason::Fatal => self.counters.fatal.fetch_add(1, Ordering::Relaxed),
        };

        let item = failed.item;
        self.emit(QueueEvent::ItemFailed {
            id: item.id,
            kind: item.kind,
            reason,
            last_error: item.last_error,
        });
        Ok(())
    }
}
