//! Listener configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// E1.31 UDP port.
pub const SACN_PORT: u16 = 5568;

/// E1.31 network data loss timeout.
pub const NETWORK_DATA_LOSS_TIMEOUT: Duration = Duration::from_millis(2500);

/// Tuning knobs for a universe listener.
///
/// The defaults match the E1.31 standard (port 5568, 2.5 second data loss
/// timeout); tests override the port to bind an ephemeral one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// UDP port to bind (0 = ephemeral, unicast only)
    pub port: u16,
    /// Milliseconds without traffic before a source is marked offline
    pub timeout_ms: u64,
    /// Milliseconds between timeout sweeps
    pub sweep_interval_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: SACN_PORT,
            timeout_ms: NETWORK_DATA_LOSS_TIMEOUT.as_millis() as u64,
            sweep_interval_ms: 1000,
        }
    }
}

impl ListenerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
