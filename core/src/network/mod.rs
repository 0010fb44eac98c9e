//! Host network interface tracking
//!
//! - **host**: enumeration and address assignment against the host stack
//! - **address**: address plans for new bridge interfaces
//! - **reconciler**: the periodic poll that adopts and prunes `btN` interfaces

pub mod address;
pub mod host;
pub mod reconciler;

pub use address::{AddressAllocator, AddressPlan};
pub use host::{HostError, HostNetwork, LinuxHost, DEFAULT_IP_BINARY, DEFAULT_SYSFS_NET};
pub use reconciler::{
    InterfaceReconciler, InterfaceRecord, ReconcileError, ReconcileReport, ReconcilerConfig,
};
