//! # Sync Queue
//!
//! Offline durability for client applications: state-changing operations are
//! persisted locally first and replayed to the backend when connectivity
//! allows, with bounded per-item retry and a dead-letter collection for the
//! ones that never make it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Producers                             │
//! │  • enqueue_final_submit() / enqueue_feedback() / enqueue()  │
//! │  • Durable before return, regardless of connectivity        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Record Store                             │
//! │  • SQLite file (durable) or in-memory (volatile fallback)   │
//! │  • sync_queue / sync_queue_failed / cache_entries           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              (SyncTrigger: startup, reconnect, periodic)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Drain Pass (single-flight)               │
//! │  • FIFO, one item at a time, paced                          │
//! │  • Exponential backoff with jitter per item                 │
//! │  • Exhausted / fatal items → dead letter                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Submission Adapters                        │
//! │  • One per item kind, stable idempotency key per item       │
//! │  • Retryable vs fatal failures                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Alongside the queue, [`ResultCache`] keeps content-addressed results of
//! expensive idempotent remote calls in the same store.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use serde_json::json;
//! use sync_queue::{
//!     AdapterRegistry, Connectivity, QueueItemKind, RemoteError, SubmissionAdapter,
//!     SubmissionEnvelope, SyncQueue, SyncQueueConfig, SyncTrigger,
//! };
//!
//! struct FeedbackApi;
//!
//! #[async_trait]
//! impl SubmissionAdapter for FeedbackApi {
//!     async fn submit(&self, envelope: &SubmissionEnvelope) -> Result<(), RemoteError> {
//!         // POST envelope.payload with envelope.idempotency_key
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncQueueConfig {
//!         store_path: Some("./offline_queue.db".into()),
//!         ..Default::default()
//!     };
//!     let connectivity = Connectivity::new(true);
//!     let adapters = AdapterRegistry::new()
//!         .with_adapter(QueueItemKind::Feedback, Arc::new(FeedbackApi));
//!
//!     let queue = Arc::new(SyncQueue::open(config.clone(), adapters, connectivity.subscribe()).await);
//!     let trigger = SyncTrigger::spawn(queue.clone(), &config);
//!
//!     queue.enqueue_feedback(json!({"rating": 5})).await.expect("enqueue failed");
//!
//!     // Platform glue reports reachability changes
//!     connectivity.set_online(false);
//!     connectivity.set_online(true);
//!
//!     println!("{:?}", queue.status().await.expect("status failed"));
//!     trigger.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`queue`]: The [`SyncQueue`] engine and its drain pass
//! - [`trigger`]: Lifecycle triggers that start drains
//! - [`connectivity`]: Online/offline signal shared with the engine
//! - [`adapter`]: Remote submission contract
//! - [`storage`]: Record stores (SQLite, memory)
//! - [`cache`]: Result cache with caller-decided TTLs
//! - [`resilience`]: Backoff and retry policies
//! - [`clock`]: Injectable wall clock

pub mod adapter;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod metrics;
pub mod queue;
pub mod queue_item;
pub mod resilience;
pub mod storage;
pub mod trigger;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use adapter::{AdapterRegistry, RemoteError, SubmissionAdapter, SubmissionEnvelope};
pub use cache::{cache_key, CacheEntry, CacheHit, CacheKind, ResultCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncQueueConfig;
pub use connectivity::Connectivity;
pub use metrics::LatencyTimer;
pub use queue::{
    DrainOutcome, DrainSummary, FailedItem, FailureReason, QueueError, QueueEvent, QueueStats,
    QueueStatus, SkipReason, SyncQueue,
};
pub use queue_item::{ItemState, QueueItem, QueueItemKind};
pub use resilience::backoff::BackoffPolicy;
pub use resilience::retry::RetryConfig;
pub use storage::{open_store, Collection, Durability, MemoryStore, RecordStore, SqliteStore, StorageError};
pub use trigger::{SyncTrigger, TriggerHandle};
