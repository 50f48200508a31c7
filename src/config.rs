//! Configuration for the sync queue.
//!
//! # Example
//!
//! ```
//! use sync_queue::SyncQueueConfig;
//! use std::time::Duration;
//!
//! // Minimal config (volatile store, production timings)
//! let config = SyncQueueConfig::default();
//! assert_eq!(config.max_retries, 5);
//! assert_eq!(config.pacing(), Duration::from_millis(500));
//!
//! // On-device store with a shorter periodic sweep
//! let config = SyncQueueConfig {
//!     store_path: Some("./offline_queue.db".into()),
//!     periodic_interval_secs: 60,
//!     ..Default::default()
//! };
//! assert_eq!(config.periodic_interval(), Some(Duration::from_secs(60)));
//! ```

use serde::Deserialize;
use std::time::Duration;

use crate::resilience::backoff::BackoffPolicy;

/// Configuration for the sync queue, its store and its triggers.
///
/// All fields have sensible defaults. Set `store_path` for anything that must
/// survive an application restart.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncQueueConfig {
    /// SQLite file for the durable record store. `None` selects the volatile store.
    #[serde(default)]
    pub store_path: Option<String>,

    /// Failed attempts before an item is moved to the dead-letter collection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff curve: `min(base * 2^retries, max) + jitter`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,

    /// Pause between consecutive submissions within one drain pass
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// Upper bound on a single adapter call
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,

    /// Wait after connectivity returns before draining
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Wait after startup before the first opportunistic drain
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,

    /// Periodic drain interval (0 = disabled)
    #[serde(default = "default_periodic_interval_secs")]
    pub periodic_interval_secs: u64,

    /// Records per page when purging the result cache
    #[serde(default = "default_cache_purge_page_size")]
    pub cache_purge_page_size: usize,

    /// Buffered queue events per subscriber before lagging
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_retries() -> u32 { 5 }
fn default_base_delay_ms() -> u64 { 1_000 }
fn default_max_delay_ms() -> u64 { 300_000 } // 5 minutes
fn default_jitter_ratio() -> f64 { 0.3 }
fn default_pacing_ms() -> u64 { 500 }
fn default_submit_timeout_ms() -> u64 { 30_000 }
fn default_settle_delay_ms() -> u64 { 2_000 }
fn default_startup_delay_ms() -> u64 { 3_000 }
fn default_periodic_interval_secs() -> u64 { 300 }
fn default_cache_purge_page_size() -> usize { 200 }
fn default_event_capacity() -> usize { 64 }

impl Default for SyncQueueConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
            pacing_ms: default_pacing_ms(),
            submit_timeout_ms: default_submit_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            startup_delay_ms: default_startup_delay_ms(),
            periodic_interval_secs: default_periodic_interval_secs(),
            cache_purge_page_size: default_cache_purge_page_size(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl SyncQueueConfig {
    #[must_use]
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_ratio: self.jitter_ratio,
            max_retries: self.max_retries,
        }
    }

    #[must_use]
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    #[must_use]
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    #[must_use]
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    /// `None` when periodic draining is disabled.
    #[must_use]
    pub fn periodic_interval(&self) -> Option<Duration> {
        (self.periodic_interval_secs > 0).then(|| Duration::from_secs(self.periodic_interval_secs))
    }
}
