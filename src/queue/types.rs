//! Public types for the sync queue engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue_item::{QueueItem, QueueItemKind};
use crate::storage::traits::StorageError;

#[derive(Error, Debug)]
pub enum QueueError {
    /// The record store could not be read or written. Not retried internally.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),
    #[error("corrupt queue record '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

/// Why a drain request did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another pass holds the single-flight guard
    AlreadyDraining,
    /// Connectivity is known to be down
    Offline,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyDraining => "draining",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts for one completed drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Items delivered and removed
    pub succeeded: usize,
    /// Failed attempts (retryable and fatal)
    pub failed: usize,
    /// Attempts made: `succeeded + failed`
    pub processed: usize,
    /// Items that ran out of retry budget and were dead-lettered
    pub exhausted: usize,
    /// Items dead-lettered on a fatal adapter error
    pub fatal: usize,
    /// Due items left untouched because no adapter handles their kind
    pub deferred: usize,
}

impl DrainSummary {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Items that left the active queue for the dead-letter collection.
    #[must_use]
    pub fn dead_lettered(&self) -> usize {
        self.exhausted + self.fatal
    }
}

/// Result of [`super::SyncQueue::drain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(DrainSummary),
    Skipped(SkipReason),
}

impl DrainOutcome {
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    #[must_use]
    pub fn summary(&self) -> Option<&DrainSummary> {
        match self {
            Self::Completed(summary) => Some(summary),
            Self::Skipped(_) => None,
        }
    }
}

/// Snapshot for operator tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Items in the active queue
    pub total_items: usize,
    /// Never attempted-and-failed, eligible now
    pub pending_items: usize,
    /// Failed, still inside their backoff window
    pub waiting_items: usize,
    /// Failed, backoff elapsed
    pub ready_to_retry: usize,
    /// Items in the dead-letter collection
    pub failed_items: usize,
    pub is_processing: bool,
    pub is_online: bool,
}

/// Lifetime counters since the queue was constructed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub succeeded: u64,
    pub failed_attempts: u64,
    pub exhausted: u64,
    pub fatal: u64,
    pub passes: u64,
    pub skipped: u64,
}

/// Why an item left the active queue without being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    /// Retry budget used up
    Exhausted,
    /// Adapter reported a non-retryable failure
    Fatal,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted => write!(f, "exhausted"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Dead-letter record: the item as it was on its last attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    #[serde(flatten)]
    pub item: QueueItem,
    /// Epoch millis
    pub failed_at: i64,
    pub reason: FailureReason,
}

/// Broadcast to [`super::SyncQueue::subscribe`]rs.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// A drain pass completed (sent for every completed pass, including empty ones)
    Processed(DrainSummary),
    /// An item was moved to the dead-letter collection
    ItemFailed {
        id: String,
        kind: QueueItemKind,
        reason: FailureReason,
        last_error: Option<String>,
    },
}
