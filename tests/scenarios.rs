//! End-to-end scenarios for the sync queue.
//!
//! Everything runs against the in-memory store with a manual wall clock, so
//! backoff gates and cache ages move only when a test says so.
//!
//! Run with: `cargo test --test scenarios`

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::broadcast;

use sync_queue::{
    cache_key, AdapterRegistry, CacheKind, Clock, Connectivity, DrainOutcome, DrainSummary, FailureReason,
    ManualClock, MemoryStore, QueueEvent, QueueItemKind, RemoteError, ResultCache, SkipReason,
    SubmissionAdapter, SubmissionEnvelope, SyncQueue, SyncQueueConfig, SyncTrigger,
};

const T0: i64 = 1_700_000_000_000;

/// Plays back scripted results, succeeding once the script runs out.
#[derive(Default)]
struct ScriptedBackend {
    script: Mutex<VecDeque<Result<(), RemoteError>>>,
    seen: Mutex<Vec<SubmissionEnvelope>>,
}

impl ScriptedBackend {
    fn new(script: Vec<Result<(), RemoteError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl SubmissionAdapter for ScriptedBackend {
    async fn submit(&self, envelope: &SubmissionEnvelope) -> Result<(), RemoteError> {
        // A real network call suspends at least once
        tokio::task::yield_now().await;
        self.seen.lock().push(envelope.clone());
        self.script.lock().pop_front().unwrap_or(Ok(()))
    }
}

struct Setup {
    queue: Arc<SyncQueue>,
    connectivity: Connectivity,
    clock: ManualClock,
    backend: Arc<ScriptedBackend>,
    config: SyncQueueConfig,
}

fn setup(backend: Arc<ScriptedBackend>, online: bool) -> Setup {
    let config = SyncQueueConfig {
        pacing_ms: 0,
        ..Default::default()
    };
    let connectivity = Connectivity::new(online);
    let clock = ManualClock::new(T0);
    let adapters = AdapterRegistry::new()
        .with_adapter(QueueItemKind::FinalSubmit, backend.clone())
        .with_adapter(QueueItemKind::Feedback, backend.clone());
    let queue = SyncQueue::new(
        config.clone(),
        Arc::new(MemoryStore::new()),
        adapters,
        connectivity.subscribe(),
    )
    .with_clock(Arc::new(clock.clone()))
    .with_rng_seed(1);

    Setup {
        queue: Arc::new(queue),
        connectivity,
        clock,
        backend,
        config,
    }
}

async fn next_pass(events: &mut broadcast::Receiver<QueueEvent>) -> DrainSummary {
    loop {
        if let QueueEvent::Processed(summary) = events.recv().await.unwrap() {
            return summary;
        }
    }
}

// =============================================================================
// Queue scenarios
// =============================================================================

#[tokio::test]
async fn enqueue_then_drain_delivers_everything() {
    let s = setup(ScriptedBackend::new(vec![]), true);
    for n in 0..4 {
        s.queue.enqueue_final_submit(json!({"projectId": n})).await.unwrap();
    }
    for n in 0..3 {
        s.queue.enqueue_feedback(json!({"rating": n})).await.unwrap();
    }

    let outcome = s.queue.drain().await.unwrap();
    let summary = outcome.summary().unwrap();
    assert_eq!(summary.succeeded, 7);
    assert_eq!(summary.processed, 7);

    let status = s.queue.status().await.unwrap();
    assert_eq!(status.total_items, 0);
    assert_eq!(s.backend.calls(), 7);
}

#[tokio::test]
async fn always_failing_item_ends_in_dead_letter() {
    let s = setup(ScriptedBackend::new(vec![Err(RemoteError::retryable("HTTP 500")); 10]), true);
    let item = s.queue.enqueue_final_submit(json!({"projectId": "p"})).await.unwrap();

    for attempt in 1..=5u32 {
        s.queue.drain().await.unwrap();
        let status = s.queue.status().await.unwrap();
        if attempt < 5 {
            assert_eq!(status.waiting_items, 1, "attempt {attempt}");
            assert_eq!(status.failed_items, 0);
        }
        // Jump past any gate (max 300s * 1.3)
        s.clock.advance(Duration::from_secs(400));
    }

    let status = s.queue.status().await.unwrap();
    assert_eq!(status.failed_items, 1);
    assert_eq!(status.total_items, 0);
    assert_eq!(status.pending_items + status.ready_to_retry, 0);

    let failed = s.queue.failed().await.unwrap();
    assert_eq!(failed[0].item.id, item.id);
    assert_eq!(failed[0].reason, FailureReason::Exhausted);
    assert_eq!(failed[0].item.last_error.as_deref(), Some("HTTP 500"));

    // Attempts numbered 1..=5, all with the same key
    let seen = s.backend.seen.lock();
    assert_eq!(seen.iter().map(|e| e.attempt).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    assert!(seen.iter().all(|e| e.idempotency_key == item.id));
}

#[tokio::test]
async fn gates_grow_exponentially() {
    let s = setup(ScriptedBackend::new(vec![Err(RemoteError::retryable("503")); 4]), true);
    s.queue.enqueue_feedback(json!({})).await.unwrap();

    for retries in 1..=4u32 {
        let now = s.clock.now_ms();
        s.queue.drain().await.unwrap();
        let item = &s.queue.pending().await.unwrap()[0];
        assert_eq!(item.retries, retries);

        let base = 1_000i64 << retries;
        let delay = item.next_attempt_at.unwrap() - now;
        assert!(delay >= base, "retry {retries}: {delay}ms < {base}ms");
        assert!(delay <= base + base * 3 / 10 + 1, "retry {retries}: {delay}ms");

        s.clock.set(item.next_attempt_at.unwrap());
    }
}

#[tokio::test]
async fn concurrent_drains_run_one_pass() {
    let s = setup(ScriptedBackend::new(vec![]), true);
    for _ in 0..3 {
        s.queue.enqueue_feedback(json!({})).await.unwrap();
    }

    let (a, b) = tokio::join!(s.queue.drain(), s.queue.drain());
    let outcomes = [a.unwrap(), b.unwrap()];

    let completed = outcomes.iter().filter(|o| !o.is_skipped()).count();
    assert_eq!(completed, 1);
    assert!(outcomes.contains(&DrainOutcome::Skipped(SkipReason::AlreadyDraining)));
    assert_eq!(s.backend.calls(), 3);
}

#[tokio::test]
async fn offline_drain_touches_nothing() {
    let s = setup(ScriptedBackend::new(vec![]), false);
    let item = s.queue.enqueue_feedback(json!({"rating": 2})).await.unwrap();

    assert_eq!(s.queue.drain().await.unwrap(), DrainOutcome::Skipped(SkipReason::Offline));
    assert!(!s.queue.force_sync());
    assert_eq!(s.backend.calls(), 0);
    assert_eq!(s.queue.pending().await.unwrap(), vec![item]);
}

#[tokio::test]
async fn retry_now_revives_exhausted_item() {
    let s = setup(ScriptedBackend::new(vec![Err(RemoteError::retryable("HTTP 500")); 5]), true);
    let item = s.queue.enqueue_final_submit(json!({"projectId": "p"})).await.unwrap();
    for _ in 0..5 {
        s.queue.drain().await.unwrap();
        s.clock.advance(Duration::from_secs(400));
    }
    assert_eq!(s.queue.status().await.unwrap().failed_items, 1);

    // Backend recovered; the operator replays the item
    assert!(s.queue.retry_now(&item.id).await.unwrap());

    let status = s.queue.status().await.unwrap();
    assert_eq!(status.failed_items, 0);
    assert_eq!(status.total_items, 0);

    let seen = s.backend.seen.lock();
    let last = seen.last().unwrap();
    assert_eq!(last.attempt, 1);
    assert_eq!(last.idempotency_key, item.id);
}

#[tokio::test]
async fn retry_now_offline_makes_item_eligible() {
    let s = setup(ScriptedBackend::new(vec![Err(RemoteError::retryable("503"))]), true);
    let item = s.queue.enqueue_feedback(json!({})).await.unwrap();
    s.queue.drain().await.unwrap();
    assert_eq!(s.queue.status().await.unwrap().waiting_items, 1);

    s.connectivity.set_online(false);
    assert!(s.queue.retry_now(&item.id).await.unwrap());

    let status = s.queue.status().await.unwrap();
    assert_eq!(status.pending_items, 1);
    assert_eq!(status.waiting_items, 0);
    assert_eq!(s.backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_triggers_drain_to_empty() {
    let s = setup(ScriptedBackend::new(vec![]), false);
    let mut events = s.queue.subscribe();
    let trigger = SyncTrigger::spawn(s.queue.clone(), &s.config);

    s.queue.enqueue_final_submit(json!({"projectId": "p1"})).await.unwrap();
    s.queue.enqueue_feedback(json!({"rating": 5})).await.unwrap();
    assert!(s.queue.drain().await.unwrap().is_skipped());

    s.connectivity.set_online(true);
    let summary = next_pass(&mut events).await;
    assert_eq!(summary.succeeded, 2);

    let status = s.queue.status().await.unwrap();
    assert_eq!(status.total_items, 0);
    assert!(status.is_online);

    trigger.shutdown().await;
}

#[tokio::test]
async fn events_report_passes_and_failures() {
    let s = setup(ScriptedBackend::new(vec![Err(RemoteError::fatal("422")), Ok(())]), true);
    let mut events = s.queue.subscribe();
    let doomed = s.queue.enqueue_final_submit(json!({})).await.unwrap();
    s.queue.enqueue_feedback(json!({})).await.unwrap();

    s.queue.drain().await.unwrap();

    match events.recv().await.unwrap() {
        QueueEvent::ItemFailed { id, kind, reason, last_error } => {
            assert_eq!(id, doomed.id);
            assert_eq!(kind, QueueItemKind::FinalSubmit);
            assert_eq!(reason, FailureReason::Fatal);
            assert_eq!(last_error.as_deref(), Some("422"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    let summary = next_pass(&mut events).await;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.fatal, 1);

    let stats = s.queue.stats();
    assert_eq!(stats.enqueued, 2);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.fatal, 1);
}

#[tokio::test]
async fn connectivity_receiver_can_be_shared() {
    let connectivity = Connectivity::new(true);
    let queue = SyncQueue::new(
        SyncQueueConfig::default(),
        Arc::new(MemoryStore::new()),
        AdapterRegistry::new(),
        connectivity.subscribe(),
    );
    assert!(queue.is_online());
    connectivity.set_online(false);
    assert!(!queue.is_online());
}

// =============================================================================
// Cache scenarios
// =============================================================================

#[tokio::test]
async fn cache_hit_then_stale_after_ttl() {
    let clock = ManualClock::new(T0);
    let cache = ResultCache::new(Arc::new(MemoryStore::new())).with_clock(Arc::new(clock.clone()));

    let kind = CacheKind::AiScore;
    let key = cache_key(&kind, "  The quick   brown fox ", &json!({"model": "v2"}));
    cache.store(&key, json!({"score": 0.82}), kind.clone()).await.unwrap();

    let hit = cache.lookup(&key).await.unwrap().unwrap();
    assert_eq!(hit.age, Duration::ZERO);
    assert_eq!(hit.data, json!({"score": 0.82}));
    assert!(hit.is_fresh(kind.default_ttl()));

    // Same logical request hits the same entry
    let same = cache_key(&kind, "The quick brown fox", &json!({"model": "v2"}));
    assert_eq!(same, key);

    clock.advance(kind.default_ttl() + Duration::from_secs(1));
    let hit = cache.lookup(&key).await.unwrap().unwrap();
    assert!(!hit.is_fresh(kind.default_ttl()));
    assert!(cache.lookup_fresh(&key, kind.default_ttl()).await.unwrap().is_none());

    assert_eq!(cache.purge_older_than(kind.default_ttl()).await.unwrap(), 1);
    assert!(cache.lookup(&key).await.unwrap().is_none());
}
