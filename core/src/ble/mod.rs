//! BLE discovery
//!
//! Everything between the radio and the connection workers:
//!
//! - **observation**: advertisement snapshots and the IPSP capability predicate
//! - **dedup**: time-windowed, bounded duplicate suppression
//! - **queue**: non-blocking candidate queue with drop-oldest overflow
//! - **filter**: the discovery filter combining predicate, dedup and queue
//! - **scanner**: the injected scan driver seam and the discovery task

pub mod dedup;
pub mod filter;
pub mod observation;
pub mod queue;
pub mod scanner;

pub use dedup::{DedupTable, DEFAULT_DEDUP_WINDOW, DEFAULT_MAX_TRACKED};
pub use filter::{DiscoveryConfig, DiscoveryFilter, DiscoveryStats, FilterDecision};
pub use observation::{is_ipsp_capable, DeviceObservation, IPSP_NAME_MARKER, IPSP_SERVICE_UUID};
pub use queue::{CandidateEvent, CandidateQueue, PushOutcome, DEFAULT_QUEUE_CAPACITY};
pub use scanner::{run_discovery, ObservationCallback, ScanDriver, ScanError};
