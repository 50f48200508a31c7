//! Queue item data structure.
//!
//! A [`QueueItem`] is one state-changing operation waiting for remote
//! confirmation. Its persisted JSON shape is fixed:
//!
//! ```json
//! {"id": "…", "type": "feedback", "payload": {…}, "createdAt": 1700000000000,
//!  "retries": 0, "nextAttemptAt": null, "lastError": null}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation kind. Known kinds get their own variant; anything else round-trips
/// through [`QueueItemKind::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QueueItemKind {
    FinalSubmit,
    Feedback,
    Custom(String),
}

impl QueueItemKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::FinalSubmit => "finalSubmit",
            Self::Feedback => "feedback",
            Self::Custom(s) => s,
        }
    }
}

impl From<String> for QueueItemKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "finalSubmit" => Self::FinalSubmit,
            "feedback" => Self::Feedback,
            _ => Self::Custom(s),
        }
    }
}

impl From<&str> for QueueItemKind {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<QueueItemKind> for String {
    fn from(kind: QueueItemKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for QueueItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an item sits relative to its backoff gate at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Never failed, eligible now
    Pending,
    /// Failed, gate still in the future
    RetryWait,
    /// Failed, gate elapsed
    Eligible,
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::RetryWait => write!(f, "RetryWait"),
            Self::Eligible => write!(f, "Eligible"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Unique per store, also the idempotency key sent to the backend
    pub id: String,
    #[serde(rename = "type")]
    pub kind: QueueItemKind,
    pub payload: Value,
    /// Enqueue timestamp (epoch millis)
    pub created_at: i64,
    pub retries: u32,
    /// Backoff gate (epoch millis); `None` means eligible now
    pub next_attempt_at: Option<i64>,
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Fresh item with a random v4 id.
    pub fn new(kind: QueueItemKind, payload: Value, created_at: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            payload,
            created_at,
            retries: 0,
            next_attempt_at: None,
            last_error: None,
        }
    }

    /// Whether the backoff gate allows an attempt at `now`.
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }

    #[must_use]
    pub fn state_at(&self, now: i64) -> ItemState {
        if self.retries == 0 && self.is_due(now) {
            ItemState::Pending
        } else if self.is_due(now) {
            ItemState::Eligible
        } else {
            ItemState::RetryWait
        }
    }

    /// Record a failed attempt and gate the next one until `next_attempt_at`.
    pub fn record_failure(&mut self, error: impl Into<String>, next_attempt_at: Option<i64>) {
        self.retries = self.retries.saturating_add(1);
        self.last_error = Some(error.into());
        self.next_attempt_at = next_attempt_at;
    }

    /// Operator reset: make the item immediately eligible with a fresh budget.
    pub fn reset(&mut self) {
        self.retries = 0;
        self.next_attempt_at = None;
        self.last_error = None;
    }
}
