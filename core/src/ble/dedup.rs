//! Time-windowed duplicate suppression for discovered devices
//!
//! Every address that produced a candidate is remembered together with the time
//! it did so. A second candidate for the same address is only allowed once the
//! dedup window has elapsed. Entries are indexed by time as well so that
//! expired ones can be evicted in order, keeping memory bounded on long scans.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Default window during which repeated advertisements are suppressed
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(30);

/// Default upper bound on tracked addresses
pub const DEFAULT_MAX_TRACKED: usize = 4096;

/// Address → last-candidate-time table with ordered eviction
#[derive(Debug)]
pub struct DedupTable {
    window: Duration,
    capacity: usize,
    last_candidate: HashMap<String, Instant>,
    by_time: BTreeSet<(Instant, String)>,
}

impl DedupTable {
    /// Create a table with the given window and maximum number of entries
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            last_candidate: HashMap::new(),
            by_time: BTreeSet::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of addresses currently tracked
    pub fn len(&self) -> usize {
        self.last_candidate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_candidate.is_empty()
    }

    /// Time of the last candidate for `address`, if still tracked
    pub fn last_candidate(&self, address: &str) -> Option<Instant> {
        self.last_candidate.get(address).copied()
    }

    /// Decide whether `address` may produce a candidate at `now`.
    ///
    /// On admission the entry is upserted to `now`. A refused observation
    /// leaves the table untouched, so the window always runs from the last
    /// emitted candidate rather than from the last advertisement.
    pub fn admit(&mut self, address: &str, now: Instant) -> bool {
        self.sweep(now);

        if let Some(&last) = self.last_candidate.get(address) {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
            self.by_time.remove(&(last, address.to_string()));
            self.last_candidate.remove(address);
        }

        while self.last_candidate.len() >= self.capacity {
            match self.by_time.pop_first() {
                Some((_, oldest)) => {
                    self.last_candidate.remove(&oldest);
                }
                None => break,
            }
        }

        self.last_candidate.insert(address.to_string(), now);
        self.by_time.insert((now, address.to_string()));
        true
    }

    /// Evict every entry whose window has elapsed at `now`.
    ///
    /// Returns the number of evicted entries. Evicted addresses would have been
    /// admitted anyway, so sweeping never changes a dedup decision.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        while let Some((seen_at, _)) = self.by_time.first() {
            if now.saturating_duration_since(*seen_at) < self.window {
                break;
            }
            if let Some((_, address)) = self.by_time.pop_first() {
                self.last_candidate.remove(&address);
                evicted += 1;
            }
        }
        evicted
    }
}

impl Default for DedupTable {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW, DEFAULT_MAX_TRACKED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    #[test]
    fn test_first_observation_admitted() {
        let mut table = DedupTable::default();
        assert!(table.admit(ADDR, Instant::now()));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_repeat_within_window_suppressed() {
        let mut table = DedupTable::default();
        let t0 = Instant::now();
        assert!(table.admit(ADDR, t0));
        assert!(!table.admit(ADDR, t0 + Duration::from_secs(10)));
        assert!(!table.admit(ADDR, t0 + Duration::from_millis(29_999)));
        assert_eq!(table.last_candidate(ADDR), Some(t0));
    }

    #[test]
    fn test_exact_window_boundary_admitted() {
        let mut table = DedupTable::default();
        let t0 = Instant::now();
        assert!(table.admit(ADDR, t0));
        assert!(table.admit(ADDR, t0 + DEFAULT_DEDUP_WINDOW));
    }

    #[test]
    fn test_suppressed_observation_does_not_extend_window() {
        let mut table = DedupTable::default();
        let t0 = Instant::now();
        assert!(table.admit(ADDR, t0));
        assert!(!table.admit(ADDR, t0 + Duration::from_secs(20)));
        assert!(table.admit(ADDR, t0 + Duration::from_secs(31)));
        assert_eq!(
            table.last_candidate(ADDR),
            Some(t0 + Duration::from_secs(31))
        );
    }

    #[test]
    fn test_addresses_are_independent() {
        let mut table = DedupTable::default();
        let t0 = Instant::now();
        assert!(table.admit("AA:AA:AA:AA:AA:AA", t0));
        assert!(table.admit("BB:BB:BB:BB:BB:BB", t0));
        assert!(!table.admit("AA:AA:AA:AA:AA:AA", t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_sweep_evicts_expired_entries() {
        let mut table = DedupTable::default();
        let t0 = Instant::now();
        table.admit("AA:AA:AA:AA:AA:AA", t0);
        table.admit("BB:BB:BB:BB:BB:BB", t0 + Duration::from_secs(20));

        assert_eq!(table.sweep(t0 + Duration::from_secs(35)), 1);
        assert_eq!(table.len(), 1);
        assert!(table.last_candidate("AA:AA:AA:AA:AA:AA").is_none());
        assert!(table.last_candidate("BB:BB:BB:BB:BB:BB").is_some());
    }

    #[test]
    fn test_refresh_replaces_time_index_entry() {
        let mut table = DedupTable::default();
        let t0 = Instant::now();
        table.admit(ADDR, t0);
        table.admit(ADDR, t0 + Duration::from_secs(40));

        // Only the refreshed entry remains in the time index
        assert_eq!(table.sweep(t0 + Duration::from_secs(50)), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut table = DedupTable::new(DEFAULT_DEDUP_WINDOW, 2);
        let t0 = Instant::now();
        table.admit("01:00:00:00:00:00", t0);
        table.admit("02:00:00:00:00:00", t0 + Duration::from_secs(1));
        table.admit("03:00:00:00:00:00", t0 + Duration::from_secs(2));

        assert_eq!(table.len(), 2);
        assert!(table.last_candidate("01:00:00:00:00:00").is_none());
        assert!(table.last_candidate("03:00:00:00:00:00").is_some());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut table = DedupTable::new(DEFAULT_DEDUP_WINDOW, 0);
        assert!(table.admit(ADDR, Instant::now()));
        assert_eq!(table.len(), 1);
    }
}
