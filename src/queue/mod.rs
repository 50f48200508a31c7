// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync queue engine.
//!
//! The [`SyncQueue`] owns the persisted queue of pending remote operations and
//! replays them through the registered [`SubmissionAdapter`]s when
//! connectivity allows.
//!
//! # Item lifecycle
//!
//! ```text
//! enqueue → Pending ──attempt──→ delivered (removed)
//!              │
//!              └─ retryable failure → RetryWait ──gate elapses──→ Eligible ──attempt──→ ...
//!                                         │
//!                                         └─ budget used up / fatal → dead letter
//! ```
//!
//! At most one drain pass runs at a time. A second `drain()` or `force_sync()`
//! while a pass holds the guard returns immediately without touching items.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sync_queue::{AdapterRegistry, Connectivity, MemoryStore, SyncQueue, SyncQueueConfig};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let connectivity = Connectivity::new(false);
//! let queue = SyncQueue::new(
//!     SyncQueueConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     AdapterRegistry::new(),
//!     connectivity.subscribe(),
//! );
//!
//! queue.enqueue_feedback(json!({"rating": 5})).await.expect("enqueue failed");
//! assert_eq!(queue.status().await.unwrap().total_items, 1);
//! # }
//! ```
//!
//! [`SubmissionAdapter`]: crate::adapter::SubmissionAdapter

mod api;
mod drain;
mod types;

pub use types::{
    DrainOutcome, DrainSummary, FailedItem, FailureReason, QueueError, QueueEvent, QueueStats,
    QueueStatus, SkipReason,
};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, watch};

use crate::adapter::AdapterRegistry;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncQueueConfig;
use crate::resilience::backoff::BackoffPolicy;
use crate::storage::traits::{Collection, RecordStore};

/// Active queue items, keyed by item id.
pub const QUEUE_COLLECTION: Collection = Collection {
    name: "sync_queue",
    key_field: "id",
    indexes: &["type", "createdAt"],
};

/// Dead-letter items, keyed by item id.
pub const FAILED_COLLECTION: Collection = Collection {
    name: "sync_queue_failed",
    key_field: "id",
    indexes: &["type", "reason"],
};

/// Lifetime counters
#[derive(Default)]
pub(super) struct Counters {
    pub(super) enqueued: AtomicU64,
    pub(super) succeeded: AtomicU64,
    pub(super) failed_attempts: AtomicU64,
    pub(super) exhausted: AtomicU64,
    pub(super) fatal: AtomicU64,
    pub(super) passes: AtomicU64,
    pub(super) skipped: AtomicU64,
}

/// Offline durability queue.
///
/// Share it behind an `Arc`: [`force_sync`](Self::force_sync) and the
/// [`SyncTrigger`](crate::trigger::SyncTrigger) need an owned handle to spawn
/// passes.
pub struct SyncQueue {
    pub(super) config: SyncQueueConfig,

    /// Derived from `config`
    pub(super) policy: BackoffPolicy,

    /// Durable or volatile record store, selected once at startup
    pub(super) store: Arc<dyn RecordStore>,

    pub(super) adapters: AdapterRegistry,

    /// Last known connectivity
    pub(super) connectivity: watch::Receiver<bool>,

    pub(super) clock: Arc<dyn Clock>,

    /// Jitter source
    pub(super) rng: Mutex<StdRng>,

    /// Single-flight drain guard
    pub(super) draining: Arc<AtomicBool>,

    pub(super) events: broadcast::Sender<QueueEvent>,

    pub(super) counters: Counters,
}

impl SyncQueue {
    /// Create a queue over `store`.
    ///
    /// Nothing is drained until [`drain`](Self::drain) or
    /// [`force_sync`](Self::force_sync) is called, usually by a
    /// [`SyncTrigger`](crate::trigger::SyncTrigger).
    pub fn new(
        config: SyncQueueConfig,
        store: Arc<dyn RecordStore>,
        adapters: AdapterRegistry,
        connectivity: watch::Receiver<bool>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            policy: config.backoff_policy(),
            config,
            store,
            adapters,
            connectivity,
            clock: Arc::new(SystemClock),
            rng: Mutex::new(StdRng::from_entropy()),
            draining: Arc::new(AtomicBool::new(false)),
            events,
            counters: Counters::default(),
        }
    }

    /// Open the store described by `config` (SQLite, falling back to memory)
    /// and build a queue over it.
    pub async fn open(
        config: SyncQueueConfig,
        adapters: AdapterRegistry,
        connectivity: watch::Receiver<bool>,
    ) -> Self {
        let store = crate::storage::open_store(&config).await;
        Self::new(config, store, adapters, connectivity)
    }

    /// Replace the wall clock used for backoff gates and status buckets.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seed the jitter source for reproducible delays.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    #[must_use]
    pub fn config(&self) -> &SyncQueueConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Whether a drain pass currently holds the guard.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.connectivity.borrow()
    }

    /// A fresh receiver on the connectivity channel the queue watches.
    #[must_use]
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connectivity.clone()
    }

    /// Subscribe to pass completions and dead-letter moves.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let c = &self.counters;
        QueueStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed_attempts: c.failed_attempts.load(Ordering::Relaxed),
            exhausted: c.exhausted.load(Ordering::Relaxed),
            fatal: c.fatal.load(Ordering::Relaxed),
            passes: c.passes.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
        }
    }

    pub(super) fn emit(&self, event: QueueEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("durability", &self.store.durability())
            .field("adapters", &self.adapters)
            .field("online", &self.is_online())
            .field("processing", &self.is_processing())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::adapter::{RemoteError, SubmissionAdapter, SubmissionEnvelope};
    use crate::clock::ManualClock;
    use crate::queue_item::QueueItemKind;
    use crate::storage::memory::MemoryStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Adapter that replays a script of results, then succeeds.
    #[derive(Default)]
    pub struct ScriptedAdapter {
        script: parking_lot::Mutex<VecDeque<Result<(), RemoteError>>>,
        pub calls: parking_lot::Mutex<Vec<SubmissionEnvelope>>,
    }

    impl ScriptedAdapter {
        pub fn new(script: Vec<Result<(), RemoteError>>) -> Arc<Self> {
            Arc::new(Self {
                script: parking_lot::Mutex::new(script.into()),
                calls: parking_lot::Mutex::new(Vec::new()),
            })
        }

        pub fn always_failing() -> Arc<Self> {
            Self::new(vec![Err(RemoteError::retryable("503")); 64])
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl SubmissionAdapter for ScriptedAdapter {
        async fn submit(&self, envelope: &SubmissionEnvelope) -> Result<(), RemoteError> {
            self.calls.lock().push(envelope.clone());
            self.script.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    pub struct Harness {
        pub queue: SyncQueue,
        pub clock: ManualClock,
        pub online: watch::Sender<bool>,
        pub adapter: Arc<ScriptedAdapter>,
    }

    pub fn harness(adapter: Arc<ScriptedAdapter>) -> Harness {
        let config = SyncQueueConfig {
            pacing_ms: 0,
            ..Default::default()
        };
        let clock = ManualClock::new(1_700_000_000_000);
        let (online, rx) = watch::channel(true);
        let adapters = AdapterRegistry::new()
            .with_adapter(QueueItemKind::FinalSubmit, adapter.clone())
            .with_adapter(QueueItemKind::Feedback, adapter.clone());
        let queue = SyncQueue::new(config, Arc::new(MemoryStore::new()), adapters, rx)
            .with_clock(Arc::new(clock.clone()))
            .with_rng_seed(7);
        Harness {
            queue,
            clock,
            online,
            adapter,
        }
    }
}
