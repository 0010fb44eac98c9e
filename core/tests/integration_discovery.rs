//! Discovery filter integration tests
//!
//! Drives the filter the way a scan driver does (through the observation
//! callback) and checks what reaches the candidate queue.
//!
//! Run with: cargo test --test integration_discovery

mod common;

use common::{ipsp_observation, SENSOR};
use ipsp_gateway_core::ble::{run_discovery, DEFAULT_DEDUP_WINDOW};
use ipsp_gateway_core::{
    CandidateQueue, DeviceObservation, DiscoveryConfig, DiscoveryFilter, FilterDecision,
    IPSP_SERVICE_UUID,
};
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

fn new_filter(config: DiscoveryConfig) -> (DiscoveryFilter, Arc<CandidateQueue>) {
    let queue = Arc::new(CandidateQueue::new(config.queue_capacity));
    (DiscoveryFilter::new(&config, queue.clone()), queue)
}

#[test]
fn test_scenario_repeat_advertisements() {
    // Same sensor advertising at t=0, t=10s and t=31s
    let (filter, queue) = new_filter(DiscoveryConfig::default());
    let origin = Instant::now();

    let first = filter.on_observation(ipsp_observation(SENSOR, origin, Duration::ZERO));
    let second = filter.on_observation(ipsp_observation(SENSOR, origin, Duration::from_secs(10)));
    let third = filter.on_observation(ipsp_observation(SENSOR, origin, Duration::from_secs(31)));

    assert_eq!(first, FilterDecision::Queued);
    assert_eq!(second, FilterDecision::Duplicate);
    assert_eq!(third, FilterDecision::Queued);

    assert_eq!(queue.len(), 2);
    let a = queue.try_pop().unwrap();
    let b = queue.try_pop().unwrap();
    assert_eq!(a.address(), SENSOR);
    assert_eq!(b.address(), SENSOR);
    assert!(a.sequence < b.sequence);

    let stats = filter.stats();
    assert_eq!(stats.observed, 3);
    assert_eq!(stats.candidates, 2);
    assert_eq!(stats.duplicates, 1);
}

#[test]
fn test_window_boundary_admits_again() {
    let (filter, _queue) = new_filter(DiscoveryConfig::default());
    let origin = Instant::now();

    filter.on_observation(ipsp_observation(SENSOR, origin, Duration::ZERO));
    let just_before = origin + DEFAULT_DEDUP_WINDOW - Duration::from_millis(1);
    assert_eq!(
        filter.on_observation(ipsp_observation(SENSOR, just_before, Duration::ZERO)),
        FilterDecision::Duplicate
    );
    assert_eq!(
        filter.on_observation(ipsp_observation(SENSOR, origin, DEFAULT_DEDUP_WINDOW)),
        FilterDecision::Queued
    );
}

#[test]
fn test_devices_are_deduplicated_independently() {
    let (filter, queue) = new_filter(DiscoveryConfig::default());
    let origin = Instant::now();

    for offset in 0..5 {
        let at = Duration::from_secs(offset);
        filter.on_observation(ipsp_observation("11:11:11:11:11:11", origin, at));
        filter.on_observation(ipsp_observation("22:22:22:22:22:22", origin, at));
    }

    assert_eq!(queue.len(), 2);
    assert_eq!(filter.tracked_devices(), 2);
}

#[test]
fn test_full_queue_sheds_oldest_candidate() {
    let config = DiscoveryConfig {
        queue_capacity: 2,
        ..DiscoveryConfig::default()
    };
    let (filter, queue) = new_filter(config);
    let origin = Instant::now();

    for (i, address) in ["01:00:00:00:00:00", "02:00:00:00:00:00", "03:00:00:00:00:00"]
        .iter()
        .enumerate()
    {
        let decision =
            filter.on_observation(ipsp_observation(address, origin, Duration::from_secs(i as u64)));
        assert!(decision.is_candidate());
    }

    assert_eq!(queue.len(), 2);
    assert_eq!(queue.try_pop().unwrap().address(), "02:00:00:00:00:00");
    assert_eq!(queue.try_pop().unwrap().address(), "03:00:00:00:00:00");
    assert_eq!(filter.stats().dropped, 1);
}

#[test]
fn test_dedup_table_stays_bounded() {
    let config = DiscoveryConfig {
        max_tracked_devices: 16,
        queue_capacity: 1,
        ..DiscoveryConfig::default()
    };
    let (filter, _queue) = new_filter(config);
    let origin = Instant::now();

    for i in 0..100u32 {
        let address = format!("00:00:00:00:{:02X}:{:02X}", i >> 8, i & 0xff);
        filter.on_observation(ipsp_observation(&address, origin, Duration::from_millis(i as u64)));
    }
    assert_eq!(filter.tracked_devices(), 16);

    // Everything has aged out once the window passes
    assert_eq!(filter.sweep(origin + Duration::from_secs(60)), 16);
    assert_eq!(filter.tracked_devices(), 0);
}

#[test]
fn test_closed_queue_discards_candidates() {
    let (filter, queue) = new_filter(DiscoveryConfig::default());
    queue.close();

    let decision = filter.on_observation(ipsp_observation(SENSOR, Instant::now(), Duration::ZERO));
    assert_eq!(decision, FilterDecision::QueueClosed);
    assert!(queue.is_empty());
}

struct OneShotScanner(Vec<DeviceObservation>);

#[test]
fn test_concurrent_callbacks_queue_one_candidate_per_device() {
    const THREADS: usize = 8;
    const PER_THREAD: u64 = 50;

    for _ in 0..200 {
        let (filter, queue) = new_filter(DiscoveryConfig::default());
        let origin = Instant::now();
        let start = Barrier::new(THREADS);

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    start.wait();
                    for i in 0..PER_THREAD {
                        filter.on_observation(ipsp_observation(
                            SENSOR,
                            origin,
                            Duration::from_millis(i * 100),
                        ));
                    }
                });
            }
        });

        assert_eq!(queue.len(), 1);
        let stats = filter.stats();
        assert_eq!(stats.candidates, 1);
        assert_eq!(stats.duplicates, THREADS as u64 * PER_THREAD - 1);
    }
}

#[test]
fn test_concurrent_callbacks_keep_sequence_in_queue_order() {
    const THREADS: usize = 4;
    const DEVICES_PER_THREAD: usize = 50;

    for _ in 0..100 {
        let config = DiscoveryConfig {
            queue_capacity: THREADS * DEVICES_PER_THREAD,
            ..DiscoveryConfig::default()
        };
        let (filter, queue) = new_filter(config);
        let origin = Instant::now();
        let start = Barrier::new(THREADS);

        std::thread::scope(|scope| {
            for t in 0..THREADS {
                let filter = &filter;
                let start = &start;
                scope.spawn(move || {
                    start.wait();
                    for d in 0..DEVICES_PER_THREAD {
                        let address = format!("{:02X}:{:02X}:00:00:00:01", t, d);
                        filter.on_observation(ipsp_observation(&address, origin, Duration::ZERO));
                    }
                });
            }
        });

        let sequences: Vec<u64> = std::iter::from_fn(|| queue.try_pop())
            .map(|candidate| candidate.sequence)
            .collect();
        assert_eq!(sequences.len(), THREADS * DEVICES_PER_THREAD);
        assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

#[async_trait::async_trait]
impl ipsp_gateway_core::ScanDriver for OneShotScanner {
    async fn enable(&mut self) -> Result<(), ipsp_gateway_core::ScanError> {
        Ok(())
    }

    async fn scan(
        &mut self,
        on_result: ipsp_gateway_core::ObservationCallback,
    ) -> Result<(), ipsp_gateway_core::ScanError> {
        for observation in self.0.drain(..) {
            on_result(observation);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_run_discovery_feeds_filter() {
    let origin = Instant::now();
    let mut scanner = OneShotScanner(vec![
        ipsp_observation(SENSOR, origin, Duration::ZERO),
        DeviceObservation::new("66:55:44:33:22:11").with_name("Headphones"),
        ipsp_observation(SENSOR, origin, Duration::from_secs(1)),
    ]);
    let (filter, queue) = new_filter(DiscoveryConfig::default());

    let result = run_discovery(&mut scanner, Arc::new(filter)).await;

    // A scan that simply stops is reported as an error
    assert!(matches!(result, Err(ipsp_gateway_core::ScanError::Ended)));
    assert_eq!(queue.len(), 1);
}

fn arb_name() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-zA-Z0-9 _-]{0,16}")
}

fn arb_services() -> impl Strategy<Value = Vec<Uuid>> {
    prop::collection::vec(any::<u128>().prop_map(Uuid::from_u128), 0..4)
}

proptest! {
    #[test]
    fn prop_no_candidate_without_ipsp_marker(
        name in arb_name(),
        services in arb_services(),
        rssi in any::<i16>(),
        offset_ms in 0u64..3_600_000,
    ) {
        prop_assume!(!services.contains(&IPSP_SERVICE_UUID));
        prop_assume!(!name.as_deref().unwrap_or("").contains("IPSP"));

        let (filter, queue) = new_filter(DiscoveryConfig::default());
        let mut observation = DeviceObservation::new(SENSOR)
            .with_rssi(rssi)
            .with_services(services)
            .at(Instant::now() + Duration::from_millis(offset_ms));
        if let Some(name) = name {
            observation = observation.with_name(name);
        }

        prop_assert_eq!(filter.on_observation(observation), FilterDecision::NotIpsp);
        prop_assert!(queue.is_empty());
    }

    #[test]
    fn prop_at_most_one_candidate_per_window(
        mut offsets in prop::collection::vec(0u64..120_000, 1..40),
    ) {
        offsets.sort_unstable();
        let (filter, queue) = new_filter(DiscoveryConfig {
            queue_capacity: 64,
            ..DiscoveryConfig::default()
        });
        let origin = Instant::now();

        for offset in &offsets {
            filter.on_observation(ipsp_observation(SENSOR, origin, Duration::from_millis(*offset)));
        }

        let mut admitted = Vec::new();
        while let Some(candidate) = queue.try_pop() {
            admitted.push(candidate.observation.observed_at);
        }
        prop_assert!(!admitted.is_empty());
        for pair in admitted.windows(2) {
            prop_assert!(pair[1] - pair[0] >= DEFAULT_DEDUP_WINDOW);
        }
    }
}
