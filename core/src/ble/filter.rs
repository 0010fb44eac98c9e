//! Discovery filter: IPSP predicate plus dedup gate
//!
//! `on_observation` is invoked from the scan driver's callback, possibly from
//! an arbitrary thread. It only takes the dedup lock for the admission check
//! and never awaits or blocks while holding it.

use super::dedup::{DedupTable, DEFAULT_DEDUP_WINDOW, DEFAULT_MAX_TRACKED};
use super::observation::DeviceObservation;
use super::queue::{CandidateQueue, PushOutcome, DEFAULT_QUEUE_CAPACITY};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Discovery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Window during which repeat advertisements are suppressed (seconds)
    pub dedup_window_secs: u64,
    /// Upper bound on addresses remembered by the dedup table
    pub max_tracked_devices: usize,
    /// Candidates buffered before the oldest is dropped
    pub queue_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: DEFAULT_DEDUP_WINDOW.as_secs(),
            max_tracked_devices: DEFAULT_MAX_TRACKED,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl DiscoveryConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}

/// What the filter did with an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Neither the IPSP service nor the IPSP name marker was advertised
    NotIpsp,
    /// Same address produced a candidate inside the dedup window
    Duplicate,
    /// A candidate was enqueued
    Queued,
    /// A candidate was enqueued and the oldest queued one was dropped
    QueuedDroppingOldest,
    /// The candidate queue is closed (gateway shutting down)
    QueueClosed,
}

impl FilterDecision {
    /// Whether a candidate event was produced
    pub fn is_candidate(&self) -> bool {
        matches!(
            self,
            FilterDecision::Queued | FilterDecision::QueuedDroppingOldest
        )
    }
}

/// Counters kept by the filter
#[derive(Debug, Default)]
struct DiscoveryCounters {
    observed: AtomicU64,
    not_ipsp: AtomicU64,
    duplicates: AtomicU64,
    candidates: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of the discovery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub observed: u64,
    pub not_ipsp: u64,
    pub duplicates: u64,
    pub candidates: u64,
    pub dropped: u64,
}

/// Turns raw observations into at most one candidate per device per window
pub struct DiscoveryFilter {
    table: Mutex<DedupTable>,
    queue: Arc<CandidateQueue>,
    counters: DiscoveryCounters,
}

impl DiscoveryFilter {
    /// Create a filter feeding `queue`
    pub fn new(config: &DiscoveryConfig, queue: Arc<CandidateQueue>) -> Self {
        Self {
            table: Mutex::new(DedupTable::new(
                config.dedup_window(),
                config.max_tracked_devices,
            )),
            queue,
            counters: DiscoveryCounters::default(),
        }
    }

    /// The queue this filter feeds
    pub fn queue(&self) -> &Arc<CandidateQueue> {
        &self.queue
    }

    /// Evaluate one advertisement
    pub fn on_observation(&self, observation: DeviceObservation) -> FilterDecision {
        self.counters.observed.fetch_add(1, Ordering::Relaxed);

        if !observation.is_ipsp_capable() {
            self.counters.not_ipsp.fetch_add(1, Ordering::Relaxed);
            return FilterDecision::NotIpsp;
        }

        let admitted = self
            .table
            .lock()
            .admit(&observation.address, observation.observed_at);
        if !admitted {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(address = %observation.address, "Suppressed duplicate IPSP advertisement");
            return FilterDecision::Duplicate;
        }

        info!(
            address = %observation.address,
            name = observation.display_name(),
            rssi = ?observation.rssi,
            "Discovered IPSP device"
        );

        match self.queue.push(observation) {
            PushOutcome::Queued => {
                self.counters.candidates.fetch_add(1, Ordering::Relaxed);
                FilterDecision::Queued
            }
            PushOutcome::DroppedOldest(oldest) => {
                self.counters.candidates.fetch_add(1, Ordering::Relaxed);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    dropped = %oldest.observation.address,
                    "Candidate queue full, dropped oldest candidate"
                );
                FilterDecision::QueuedDroppingOldest
            }
            PushOutcome::Closed => FilterDecision::QueueClosed,
        }
    }

    /// Evict dedup entries whose window has elapsed
    pub fn sweep(&self, now: Instant) -> usize {
        self.table.lock().sweep(now)
    }

    /// Number of addresses currently held by the dedup table
    pub fn tracked_devices(&self) -> usize {
        self.table.lock().len()
    }

    pub fn stats(&self) -> DiscoveryStats {
        DiscoveryStats {
            observed: self.counters.observed.load(Ordering::Relaxed),
            not_ipsp: self.counters.not_ipsp.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            candidates: self.counters.candidates.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}
