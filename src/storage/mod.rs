//! Record storage: a durable SQLite store and a volatile in-memory stand-in.
//!
//! The backend is chosen once, by [`open_store`]. Callers that care whether
//! their writes survive a restart check [`RecordStore::durability`].

pub mod memory;
pub mod sqlite;
pub mod traits;

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SyncQueueConfig;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{Collection, Durability, RecordStore, StorageError};

/// Open the configured store, degrading to the volatile store if the file
/// cannot be opened or no path is configured.
pub async fn open_store(config: &SyncQueueConfig) -> Arc<dyn RecordStore> {
    let Some(ref path) = config.store_path else {
        warn!("No store path configured - queued operations will not survive a restart");
        return Arc::new(MemoryStore::new());
    };

    match SqliteStore::open(path).await {
        Ok(store) => {
            info!(path = %path, "Using durable record store");
            Arc::new(store)
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Durable store unavailable, falling back to volatile memory store");
            crate::metrics::record_store_fallback();
            Arc::new(MemoryStore::new())
        }
    }
}
