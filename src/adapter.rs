//! Remote submission adapters.
//!
//! The queue does not know how to talk to the backend; it hands each due item
//! to the [`SubmissionAdapter`] registered for the item's kind.
//!
//! # Idempotency
//!
//! Every attempt for the same item carries the same
//! [`SubmissionEnvelope::idempotency_key`] (the item id). If an attempt reaches
//! the backend but its acknowledgement is lost, the retry arrives with the same
//! key; the backend is expected to treat it as a duplicate. The client does not
//! deduplicate.
//!
//! # Failure classification
//!
//! Adapters return [`RemoteError::Retryable`] for anything that might succeed
//! later (network down, 5xx, rate limited) and [`RemoteError::Fatal`] for
//! requests the backend will never accept (malformed payload, 4xx validation).
//! Retryable failures consume the item's retry budget; fatal ones move it to the
//! dead-letter collection immediately.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::queue_item::{QueueItem, QueueItemKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("retryable remote failure: {0}")]
    Retryable(String),
    #[error("fatal remote failure: {0}")]
    Fatal(String),
}

impl RemoteError {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Retryable(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Retryable(r) | Self::Fatal(r) => r,
        }
    }
}

/// What an adapter receives for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionEnvelope {
    /// Stable across retries of the same item
    pub idempotency_key: String,
    #[serde(rename = "type")]
    pub kind: QueueItemKind,
    pub payload: Value,
    /// 1 for the first attempt
    pub attempt: u32,
}

impl SubmissionEnvelope {
    #[must_use]
    pub fn for_item(item: &QueueItem) -> Self {
        Self {
            idempotency_key: item.id.clone(),
            kind: item.kind.clone(),
            payload: item.payload.clone(),
            attempt: item.retries + 1,
        }
    }
}

#[async_trait]
pub trait SubmissionAdapter: Send + Sync {
    async fn submit(&self, envelope: &SubmissionEnvelope) -> Result<(), RemoteError>;
}

/// Adapters keyed by item kind.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<QueueItemKind, Arc<dyn SubmissionAdapter>>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with_adapter(mut self, kind: QueueItemKind, adapter: Arc<dyn SubmissionAdapter>) -> Self {
        self.register(kind, adapter);
        self
    }

    /// Register `adapter` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: QueueItemKind, adapter: Arc<dyn SubmissionAdapter>) {
        self.adapters.insert(kind, adapter);
    }

    #[must_use]
    pub fn get(&self, kind: &QueueItemKind) -> Option<Arc<dyn SubmissionAdapter>> {
        self.adapters.get(kind).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.adapters.keys().map(QueueItemKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("AdapterRegistry").field("kinds", &kinds).finish()
    }
}
