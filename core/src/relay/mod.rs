//! CoAP UDP relay
//!
//! Store-and-forward bridge between the local 6LoWPAN segment and the remote
//! CoAP endpoint. Every device (client source address) gets its own upstream
//! socket so replies find their way back to the right device.

pub mod server;
mod session;

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::Duration;

pub use server::{RelayServer, RelayServerError, RelayServerStats};

/// Default CoAP-over-DTLS port used on both sides of the relay
pub const DEFAULT_COAP_PORT: u16 = 5684;

/// Default remote CoAP endpoint
pub const DEFAULT_DESTINATION: &str = "coap.golioth.dev:5684";

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayServerConfig {
    /// Run the in-process relay
    pub enabled: bool,
    /// Local UDP listen address
    pub listen: SocketAddr,
    /// Remote `host:port`
    pub destination: String,
    /// Close a device's upstream socket after this much silence (seconds)
    pub idle_timeout_secs: u64,
    /// Receive buffer size
    pub max_datagram_size: usize,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), DEFAULT_COAP_PORT),
            destination: DEFAULT_DESTINATION.to_string(),
            idle_timeout_secs: 120,
            max_datagram_size: 65_535,
        }
    }
}

impl RelayServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }
}
