//! Host bridge: promotes a BLE peer to a 6LoWPAN network interface
//!
//! On Linux this is the `bluetooth_6lowpan` debugfs control file. A write is
//! fire-and-forget: success only means the kernel accepted the request, the
//! resulting `btN` interface is observed later by the interface reconciler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Default location of the kernel's 6LoWPAN control file
pub const DEFAULT_CONTROL_PATH: &str = "/sys/kernel/debug/bluetooth/6lowpan_control";

/// Peer address type as understood by `6lowpan_control`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionType {
    /// BR/EDR (classic) address
    BrEdr,
    /// LE public device address
    LePublic,
    /// LE random device address
    LeRandom,
}

impl ConnectionType {
    /// Numeric code written to the control file
    pub fn code(self) -> u8 {
        match self {
            ConnectionType::BrEdr => 0,
            ConnectionType::LePublic => 1,
            ConnectionType::LeRandom => 2,
        }
    }
}

impl Default for ConnectionType {
    fn default() -> Self {
        ConnectionType::LeRandom
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::BrEdr => write!(f, "br-edr"),
            ConnectionType::LePublic => write!(f, "le-public"),
            ConnectionType::LeRandom => write!(f, "le-random"),
        }
    }
}

impl std::str::FromStr for ConnectionType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "br-edr" | "0" => Ok(ConnectionType::BrEdr),
            "le-public" | "public" | "1" => Ok(ConnectionType::LePublic),
            "le-random" | "random" | "2" => Ok(ConnectionType::LeRandom),
            other => Err(BridgeError::InvalidConnectionType(other.to_string())),
        }
    }
}

/// Errors from registration attempts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("6LoWPAN control unavailable at {path}: {reason}")]
    Unavailable { path: String, reason: String },
    #[error("registration of {address} rejected: {reason}")]
    Rejected { address: String, reason: String },
    #[error("invalid connection type: {0}")]
    InvalidConnectionType(String),
}

/// Host mechanism that registers a BLE peer as a network interface
#[async_trait]
pub trait HostBridge: Send + Sync {
    /// Submit one connect request for `address`
    async fn register_connection(
        &self,
        address: &str,
        connection_type: ConnectionType,
    ) -> Result<(), BridgeError>;
}

/// The command line accepted by `6lowpan_control`
pub fn connect_command(address: &str, connection_type: ConnectionType) -> String {
    format!("connect {} {}\n", address, connection_type.code())
}

/// `HostBridge` backed by the Linux `6lowpan_control` debugfs file
#[derive(Debug, Clone)]
pub struct SixLowpanControl {
    control_path: PathBuf,
}

impl SixLowpanControl {
    pub fn new(control_path: impl Into<PathBuf>) -> Self {
        Self {
            control_path: control_path.into(),
        }
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }
}

impl Default for SixLowpanControl {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROL_PATH)
    }
}

#[async_trait]
impl HostBridge for SixLowpanControl {
    async fn register_connection(
        &self,
        address: &str,
        connection_type: ConnectionType,
    ) -> Result<(), BridgeError> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.control_path)
            .await
            .map_err(|e| BridgeError::Unavailable {
                path: self.control_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let rejected = |e: std::io::Error| BridgeError::Rejected {
            address: address.to_string(),
            reason: e.to_string(),
        };
        file.write_all(connect_command(address, connection_type).as_bytes())
            .await
            .map_err(rejected)?;
        file.flush().await.map_err(rejected)?;
        Ok(())
    }
}
