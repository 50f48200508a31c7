//! Connectivity state shared between the platform glue and the queue.
//!
//! Platform code (OS reachability callbacks, browser `online`/`offline`
//! events, a health probe) calls [`Connectivity::set_online`]. The queue and
//! the trigger hold [`watch::Receiver`]s and react to transitions.

use tokio::sync::watch;
use tracing::info;

#[derive(Debug)]
pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        crate::metrics::set_online(initially_online);
        Self { tx }
    }

    /// Publish a connectivity change. Repeating the current value is a no-op
    /// and does not wake watchers.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
            crate::metrics::set_online(online);
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
