//! Producer and operator API.
//!
//! - `enqueue()` / `enqueue_final_submit()` / `enqueue_feedback()`
//! - `status()` - bucketed snapshot of the active queue
//! - `pending()` / `failed()` / `items_of_kind()` - operator views
//! - `clear_failed()` - purge the dead-letter collection
//! - `retry_now()` - reset an item's budget and replay it

use std::sync::atomic::Ordering;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::queue_item::{ItemState, QueueItem, QueueItemKind};
use crate::storage::traits::StorageError;

use super::{FailedItem, QueueError, QueueStatus, SyncQueue, FAILED_COLLECTION, QUEUE_COLLECTION};

impl SyncQueue {
    // ═══════════════════════════════════════════════════════════════════════════
    // Producers
    // ═══════════════════════════════════════════════════════════════════════════

    /// Persist a new operation for later delivery.
    ///
    /// The item is durable (on a durable store) before this returns. Only
    /// storage faults fail; connectivity is irrelevant here.
    #[tracing::instrument(skip(self, kind, payload), fields(kind = %kind))]
    pub async fn enqueue(&self, kind: QueueItemKind, payload: Value) -> Result<QueueItem, QueueError> {
        let item = QueueItem::new(kind, payload, self.clock.now_ms());
        let record = serde_json::to_value(&item).map_err(StorageError::from)?;

        self.store.put(&QUEUE_COLLECTION, &record).await?;

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_enqueued(item.kind.as_str());
        debug!(id = %item.id, "Item enqueued");
        Ok(item)
    }

    pub async fn enqueue_final_submit(&self, payload: Value) -> Result<QueueItem, QueueError> {
        self.enqueue(QueueItemKind::FinalSubmit, payload).await
    }

    pub async fn enqueue_feedback(&self, payload: Value) -> Result<QueueItem, QueueError> {
        self.enqueue(QueueItemKind::Feedback, payload).await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Operator views
    // ═══════════════════════════════════════════════════════════════════════════

    /// Snapshot of the active queue bucketed against the current time.
    pub async fn status(&self) -> Result<QueueStatus, QueueError> {
        let now = self.clock.now_ms();
        let items = self.pending().await?;
        let failed_items = self.store.count(&FAILED_COLLECTION).await? as usize;

        let mut status = QueueStatus {
            total_items: items.len(),
            pending_items: 0,
            waiting_items: 0,
            ready_to_retry: 0,
            failed_items,
            is_processing: self.is_processing(),
            is_online: self.is_online(),
        };
        for item in &items {
            match item.state_at(now) {
                ItemState::Pending => status.pending_items += 1,
                ItemState::RetryWait => status.waiting_items += 1,
                ItemState::Eligible => status.ready_to_retry += 1,
            }
        }

        crate::metrics::set_queue_depth(status.total_items);
        crate::metrics::set_failed_items(status.failed_items);
        Ok(status)
    }

    /// Active items in FIFO order. Undecodable records are skipped.
    pub async fn pending(&self) -> Result<Vec<QueueItem>, QueueError> {
        let records = self.store.get_all(&QUEUE_COLLECTION).await?;
        Ok(decode_items(records))
    }

    /// Dead-letter items in the order they failed.
    pub async fn failed(&self) -> Result<Vec<FailedItem>, QueueError> {
        let records = self.store.get_all(&FAILED_COLLECTION).await?;
        Ok(decode_items(records))
    }

    /// Active items of one kind.
    pub async fn items_of_kind(&self, kind: &QueueItemKind) -> Result<Vec<QueueItem>, QueueError> {
        let records = self
            .store
            .get_by_index(&QUEUE_COLLECTION, "type", &Value::String(kind.as_str().to_string()))
            .await?;
        Ok(decode_items(records))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Operator actions
    // ═══════════════════════════════════════════════════════════════════════════

    /// Purge the dead-letter collection, returning how many items were removed.
    #[tracing::instrument(skip(self))]
    pub async fn clear_failed(&self) -> Result<u64, QueueError> {
        let removed = self.store.clear(&FAILED_COLLECTION).await?;
        crate::metrics::set_failed_items(0);
        info!(removed, "Cleared dead-letter items");
        Ok(removed)
    }

    /// Give an item a fresh retry budget and make it eligible now.
    ///
    /// Works on active items and on dead-lettered ones (which move back into
    /// the active queue). Runs a drain afterwards when online. Returns `false`
    /// if no item has this id.
    #[tracing::instrument(skip(self))]
    pub async fn retry_now(&self, id: &str) -> Result<bool, QueueError> {
        let mut item = if let Some(record) = self.store.get(&QUEUE_COLLECTION, id).await? {
            decode_record::<QueueItem>(id, record)?
        } else if let Some(record) = self.store.get(&FAILED_COLLECTION, id).await? {
            decode_record::<FailedItem>(id, record)?.item
        } else {
            debug!("No such item");
            return Ok(false);
        };

        item.reset();
        let record = serde_json::to_value(&item).map_err(StorageError::from)?;
        // Active first: a crash in between leaves a duplicate, not a loss
        self.store.put(&QUEUE_COLLECTION, &record).await?;
        self.store.delete(&FAILED_COLLECTION, id).await?;
        info!(kind = %item.kind, "Item reset for immediate retry");

        if self.is_online() {
            let outcome = self.drain().await?;
            debug!(?outcome, "Drain after retry_now");
        }
        Ok(true)
    }
}

fn decode_record<T: serde::de::DeserializeOwned>(id: &str, record: Value) -> Result<T, QueueError> {
    serde_json::from_value(record).map_err(|e| QueueError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

/// Decode records, logging and skipping the ones that don't parse.
pub(super) fn decode_items<T: serde::de::DeserializeOwned>(records: Vec<Value>) -> Vec<T> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("<missing>")
                .to_string();
            match serde_json::from_value(record) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(id = %id, error = %e, "Skipping undecodable queue record");
                    None
                }
            }
        })
        .collect()
}
