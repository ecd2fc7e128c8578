use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Counters for one broker instance.
///
/// The broker owns its stats and only touches them from the event loop, so
/// these are plain integers rather than atomics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStats {
    /// Connections accepted on the listener
    pub accepted: u64,
    /// Connections dropped before the handshake by the rate limiter
    pub rate_limited: u64,
    /// Handshakes that failed (bad magic, short read, bad host)
    pub handshake_failures: u64,
    /// Destinations that could not be reached
    pub connect_failures: u64,
    /// Tunnels successfully paired
    pub tunnels_opened: u64,
    /// Tunnels torn down
    pub tunnels_closed: u64,
    /// Total bytes relayed client -> destination
    pub bytes_client_to_dest: u64,
    /// Total bytes relayed destination -> client
    pub bytes_dest_to_client: u64,
    /// Timestamp when the broker started (Unix timestamp)
    pub start_time: u64,
}

impl BrokerStats {
    pub fn new() -> Self {
        Self {
            start_time: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    /// Currently open tunnels
    pub fn active_tunnels(&self) -> u64 {
        self.tunnels_opened.saturating_sub(self.tunnels_closed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_client_to_dest + self.bytes_dest_to_client
    }

    /// Connections that never became a tunnel
    pub fn rejected(&self) -> u64 {
        self.rate_limited + self.handshake_failures + self.connect_failures
    }
}
