//! Connection orchestration
//!
//! - **bridge**: the host mechanism that turns a BLE peer into a network interface
//! - **orchestrator**: bounded-retry registration of queued candidates

pub mod bridge;
pub mod orchestrator;

pub use bridge::{connect_command, BridgeError, ConnectionType, HostBridge, SixLowpanControl, DEFAULT_CONTROL_PATH};
pub use orchestrator::{ConnectionOrchestrator, ConnectionOutcome, ConnectionState, OrchestratorConfig};
