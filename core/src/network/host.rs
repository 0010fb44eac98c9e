//! Host network stack access
//!
//! The reconciler only needs two operations from the host: enumerate
//! interface names and assign an IPv6 address to one of them. On Linux the
//! names come from `/sys/class/net` and addresses are added with iproute2.

use async_trait::async_trait;
use ipnet::Ipv6Net;
use std::path::PathBuf;
use thiserror::Error;

/// Default sysfs directory listing network interfaces
pub const DEFAULT_SYSFS_NET: &str = "/sys/class/net";

/// Default iproute2 binary
pub const DEFAULT_IP_BINARY: &str = "ip";

/// Errors from host network operations
#[derive(Error, Debug)]
pub enum HostError {
    #[error("failed to list interfaces: {0}")]
    Enumerate(#[source] std::io::Error),
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to assign {address} to {interface}: {reason}")]
    Assign {
        interface: String,
        address: Ipv6Net,
        reason: String,
    },
}

/// Host network stack abstraction
#[async_trait]
pub trait HostNetwork: Send + Sync {
    /// Names of all current network interfaces
    async fn list_interfaces(&self) -> Result<Vec<String>, HostError>;

    /// Add `address` to `interface`
    async fn assign_address(&self, interface: &str, address: Ipv6Net) -> Result<(), HostError>;
}

/// Linux implementation: sysfs for enumeration, `ip address add` for assignment
#[derive(Debug, Clone)]
pub struct LinuxHost {
    sysfs_net: PathBuf,
    ip_binary: String,
}

impl LinuxHost {
    pub fn new(sysfs_net: impl Into<PathBuf>, ip_binary: impl Into<String>) -> Self {
        Self {
            sysfs_net: sysfs_net.into(),
            ip_binary: ip_binary.into(),
        }
    }
}

impl Default for LinuxHost {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_NET, DEFAULT_IP_BINARY)
    }
}

#[async_trait]
impl HostNetwork for LinuxHost {
    async fn list_interfaces(&self) -> Result<Vec<String>, HostError> {
        let mut entries = tokio::fs::read_dir(&self.sysfs_net)
            .await
            .map_err(HostError::Enumerate)?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(HostError::Enumerate)? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn assign_address(&self, interface: &str, address: Ipv6Net) -> Result<(), HostError> {
        let cidr = address.to_string();
        let args = ["address", "add", cidr.as_str(), "dev", interface];
        let output = tokio::process::Command::new(&self.ip_binary)
            .args(args)
            .output()
            .await
            .map_err(|source| HostError::Spawn {
                command: format!("{} {}", self.ip_binary, args.join(" ")),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(HostError::Assign {
                interface: interface.to_string(),
                address,
                reason: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            })
        }
    }
}
