// IPSP Gateway — BLE to IPv6 onboarding core
//
// Finds BLE peripherals advertising the IP Support Profile, asks the host to
// bring each one up as a 6LoWPAN interface, addresses the interfaces as they
// appear and relays device CoAP traffic to the remote endpoint.

pub mod ble;
pub mod connect;
pub mod gateway;
pub mod network;
pub mod relay;
pub mod supervisor;

pub use ble::{
    is_ipsp_capable, CandidateEvent, CandidateQueue, DeviceObservation, DiscoveryConfig,
    DiscoveryFilter, DiscoveryStats, FilterDecision, ObservationCallback, ScanDriver, ScanError,
    IPSP_SERVICE_UUID,
};
pub use connect::{
    BridgeError, ConnectionOrchestrator, ConnectionOutcome, ConnectionState, ConnectionType,
    HostBridge, OrchestratorConfig, SixLowpanControl,
};
pub use gateway::{Gateway, GatewayConfig, GatewayError, SupervisionConfig};
pub use network::{
    AddressPlan, HostError, HostNetwork, InterfaceReconciler, InterfaceRecord, LinuxHost,
    ReconcileError, ReconcileReport, ReconcilerConfig,
};
pub use relay::{RelayServer, RelayServerConfig, RelayServerError, RelayServerStats};
pub use supervisor::{Supervisor, SupervisorError, TaskPolicy};
