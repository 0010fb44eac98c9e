//! Fake collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ipnet::Ipv6Net;
use ipsp_gateway_core::{
    BridgeError, ConnectionType, DeviceObservation, HostBridge, HostError, HostNetwork,
    ObservationCallback, ScanDriver, ScanError, IPSP_SERVICE_UUID,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub const SENSOR: &str = "AA:BB:CC:DD:EE:FF";

/// An IPSP advertisement from `address` observed `offset` after `origin`
pub fn ipsp_observation(
    address: &str,
    origin: tokio::time::Instant,
    offset: Duration,
) -> DeviceObservation {
    DeviceObservation::new(address)
        .with_name("IPSP-sensor")
        .with_rssi(-61)
        .with_service(IPSP_SERVICE_UUID)
        .at(origin + offset)
}

/// Host bridge that records requests and fails on chosen call numbers
#[derive(Default)]
pub struct RecordingBridge {
    calls: Mutex<Vec<(String, ConnectionType)>>,
    fail_on: Mutex<Vec<usize>>,
}

impl RecordingBridge {
    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Mutex::new(calls.to_vec()),
        }
    }

    pub fn calls(&self) -> Vec<(String, ConnectionType)> {
        self.calls.lock().clone()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(a, _)| a.clone()).collect()
    }
}

#[async_trait]
impl HostBridge for RecordingBridge {
    async fn register_connection(
        &self,
        address: &str,
        connection_type: ConnectionType,
    ) -> Result<(), BridgeError> {
        let call = {
            let mut calls = self.calls.lock();
            calls.push((address.to_string(), connection_type));
            calls.len()
        };
        if self.fail_on.lock().contains(&call) {
            return Err(BridgeError::Rejected {
                address: address.to_string(),
                reason: "Operation not permitted".to_string(),
            });
        }
        Ok(())
    }
}

/// Host network whose interface list is scripted per poll.
///
/// Each `list_interfaces` call pops the next scripted list; once the script
/// runs out the last list keeps being returned.
#[derive(Default)]
pub struct ScriptedHost {
    script: Mutex<VecDeque<Vec<String>>>,
    current: Mutex<Vec<String>>,
    assignments: Mutex<Vec<(String, Ipv6Net)>>,
    fail_enumeration: Mutex<bool>,
}

impl ScriptedHost {
    pub fn with_polls(polls: &[&[&str]]) -> Self {
        let host = Self::default();
        *host.script.lock() = polls
            .iter()
            .map(|names| names.iter().map(|n| n.to_string()).collect())
            .collect();
        host
    }

    /// Replace the interface list returned from now on
    pub fn set_interfaces(&self, names: &[&str]) {
        self.script.lock().clear();
        *self.current.lock() = names.iter().map(|n| n.to_string()).collect();
    }

    pub fn fail_enumeration(&self, fail: bool) {
        *self.fail_enumeration.lock() = fail;
    }

    pub fn assignments(&self) -> Vec<(String, Ipv6Net)> {
        self.assignments.lock().clone()
    }
}

#[async_trait]
impl HostNetwork for ScriptedHost {
    async fn list_interfaces(&self) -> Result<Vec<String>, HostError> {
        if *self.fail_enumeration.lock() {
            return Err(HostError::Enumerate(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "sysfs unavailable",
            )));
        }
        if let Some(next) = self.script.lock().pop_front() {
            *self.current.lock() = next;
        }
        Ok(self.current.lock().clone())
    }

    async fn assign_address(&self, interface: &str, address: Ipv6Net) -> Result<(), HostError> {
        self.assignments
            .lock()
            .push((interface.to_string(), address));
        Ok(())
    }
}

/// Scan driver that replays observations, then keeps scanning silently
pub struct ReplayScanner {
    pending: Vec<DeviceObservation>,
    enable_error: Option<ScanError>,
    pub delivered: Arc<Mutex<usize>>,
}

impl ReplayScanner {
    pub fn new(observations: Vec<DeviceObservation>) -> Self {
        Self {
            pending: observations,
            enable_error: None,
            delivered: Arc::new(Mutex::new(0)),
        }
    }

    pub fn broken_adapter() -> Self {
        Self {
            pending: Vec::new(),
            enable_error: Some(ScanError::AdapterUnavailable("hci0 is down".to_string())),
            delivered: Arc::new(Mutex::new(0)),
        }
    }
}

#[async_trait]
impl ScanDriver for ReplayScanner {
    async fn enable(&mut self) -> Result<(), ScanError> {
        match self.enable_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn scan(&mut self, on_result: ObservationCallback) -> Result<(), ScanError> {
        for observation in self.pending.drain(..) {
            on_result(observation);
            *self.delivered.lock() += 1;
        }
        std::future::pending::<()>().await;
        Ok(())
    }
}
