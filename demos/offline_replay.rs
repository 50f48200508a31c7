// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline replay demo.
//!
//! Queues work while "offline", restores connectivity and lets the trigger
//! replay everything through a flaky backend, then prints the queue status
//! and the metrics recorded along the way.
//!
//! ```bash
//! RUST_LOG=sync_queue=debug cargo run --example offline_replay
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::debugging::DebuggingRecorder;
use parking_lot::Mutex;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sync_queue::{
    AdapterRegistry, Connectivity, QueueEvent, QueueItemKind, RemoteError, SubmissionAdapter,
    SubmissionEnvelope, SyncQueue, SyncQueueConfig, SyncTrigger,
};

/// Fails the first `flaky_attempts` attempts of every item, and rejects
/// payloads flagged as malformed outright.
struct FlakyBackend {
    flaky_attempts: u32,
    attempts: Mutex<HashMap<String, u32>>,
}

#[async_trait]
impl SubmissionAdapter for FlakyBackend {
    async fn submit(&self, envelope: &SubmissionEnvelope) -> Result<(), RemoteError> {
        tokio::time::sleep(Duration::from_millis(20)).await;

        if envelope.payload.get("malformed").is_some() {
            return Err(RemoteError::fatal("400 payload rejected"));
        }

        let mut attempts = self.attempts.lock();
        let seen = attempts.entry(envelope.idempotency_key.clone()).or_insert(0);
        *seen += 1;
        if *seen <= self.flaky_attempts {
            return Err(RemoteError::retryable("503 service unavailable"));
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().map_err(|e| e.to_string())?;

    let dir = tempfile::tempdir()?;
    let config = SyncQueueConfig {
        store_path: Some(dir.path().join("offline_queue.db").to_string_lossy().into_owned()),
        base_delay_ms: 100,
        max_delay_ms: 1_000,
        pacing_ms: 50,
        settle_delay_ms: 500,
        startup_delay_ms: 1_000,
        periodic_interval_secs: 1,
        ..Default::default()
    };

    let backend = Arc::new(FlakyBackend {
        flaky_attempts: 2,
        attempts: Mutex::new(HashMap::new()),
    });
    let adapters = AdapterRegistry::new()
        .with_adapter(QueueItemKind::FinalSubmit, backend.clone())
        .with_adapter(QueueItemKind::Feedback, backend);

    let connectivity = Connectivity::new(false);
    let queue = Arc::new(SyncQueue::open(config.clone(), adapters, connectivity.subscribe()).await);
    let mut events = queue.subscribe();
    let trigger = SyncTrigger::spawn(queue.clone(), &config);

    info!("Offline: queueing work");
    queue.enqueue_final_submit(json!({"projectId": "p-17", "answers": [1, 2, 3]})).await?;
    queue.enqueue_feedback(json!({"rating": 4, "text": "Works on the train"})).await?;
    queue.enqueue_feedback(json!({"malformed": true})).await?;
    info!(status = ?queue.status().await?, "Queued while offline");

    tokio::time::sleep(Duration::from_millis(300)).await;
    info!("Connectivity restored");
    connectivity.set_online(true);

    let drained = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            match events.recv().await {
                Ok(QueueEvent::Processed(summary)) => {
                    info!(?summary, "Pass complete");
                    match queue.status().await {
                        Ok(status) if status.total_items == 0 => break,
                        Ok(_) => {}
                        Err(e) => info!(error = %e, "Status unavailable"),
                    }
                }
                Ok(QueueEvent::ItemFailed { id, reason, last_error, .. }) => {
                    info!(%id, %reason, ?last_error, "Item dead-lettered");
                }
                Err(e) => {
                    info!(error = %e, "Event stream closed");
                    break;
                }
            }
        }
    })
    .await;
    if drained.is_err() {
        info!("Gave up waiting for the queue to empty");
    }

    trigger.shutdown().await;

    println!("\nStatus: {:?}", queue.status().await?);
    println!("Stats:  {:?}", queue.stats());
    for failed in queue.failed().await? {
        println!("Dead letter: {} ({}) {:?}", failed.item.id, failed.reason, failed.item.last_error);
    }

    println!("\nMetrics:");
    for (key, _unit, _description, value) in snapshotter.snapshot().into_vec() {
        println!("  {:?} = {:?}", key.key(), value);
    }

    Ok(())
}
