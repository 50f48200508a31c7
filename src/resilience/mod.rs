//! Retry and backoff policies.
//!
//! - [`retry`]: bounded retry for opening the record store.
//! - [`backoff`]: per-item exponential backoff with jitter for remote submissions.

pub mod backoff;
pub mod retry;
