//! Process-wide listener registry
//!
//! Maps universe numbers to shared [`UniverseListener`]s with explicit
//! reference counting: every consumer of a universe gets the same listener
//! and the same socket, and the listener is torn down only when the last
//! consumer releases it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::ListenerConfig;
use crate::error::{Result, SacnError};
use crate::listener::UniverseListener;

struct ListenerEntry {
    listener: Arc<UniverseListener>,
    refs: usize,
}

/// Reference-counted universe -> listener table
pub struct ListenerManager {
    config: ListenerConfig,
    listeners: Mutex<HashMap<u16, ListenerEntry>>,
}

impl ListenerManager {
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Get the shared listener for a universe, starting it on first use.
    ///
    /// Each successful call must be balanced by a [`release`](Self::release).
    /// A bind failure propagates and leaves no entry behind.
    pub async fn acquire(&self, universe: u16) -> Result<Arc<UniverseListener>> {
        let mut listeners = self.listeners.lock().await;
        if let Some(entry) = listeners.get_mut(&universe) {
            entry.refs += 1;
            return Ok(Arc::clone(&entry.listener));
        }

        let listener = Arc::new(UniverseListener::new(universe, self.config.clone())?);
        listener.start().await?;
        listeners.insert(
            universe,
            ListenerEntry {
                listener: Arc::clone(&listener),
                refs: 1,
            },
        );
        tracing::debug!("Created shared listener for universe {}", universe);
        Ok(listener)
    }

    /// Drop one reference to a universe's listener, tearing it down when
    /// the count reaches zero.
    pub async fn release(&self, universe: u16) -> Result<()> {
        let mut listeners = self.listeners.lock().await;
        let entry = listeners
            .get_mut(&universe)
            .ok_or(SacnError::UnknownListener(universe))?;
        entry.refs -= 1;
        if entry.refs == 0 {
            entry.listener.pause();
            listeners.remove(&universe);
            tracing::debug!("Tore down listener for universe {}", universe);
        }
        Ok(())
    }

    /// Peek at an existing listener without taking a reference
    pub async fn listener(&self, universe: u16) -> Option<Arc<UniverseListener>> {
        self.listeners
            .lock()
            .await
            .get(&universe)
            .map(|entry| Arc::clone(&entry.listener))
    }

    /// Universes currently being listened to
    pub async fn universes(&self) -> Vec<u16> {
        let mut universes: Vec<u16> = self.listeners.lock().await.keys().copied().collect();
        universes.sort_unstable();
        universes
    }
}
