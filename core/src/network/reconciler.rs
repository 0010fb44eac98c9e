//! Interface reconciler — tracks bridge-created network interfaces
//!
//! On every poll the reconciler enumerates host interfaces, forgets tracked
//! interfaces that vanished, and starts tracking new ones whose name carries
//! the bridge prefix. Each new interface gets exactly one address-assignment
//! attempt; a failure is logged and never retried for that name.

use super::address::{AddressAllocator, AddressPlan};
use super::host::{HostError, HostNetwork};
use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Reconciler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Poll period (seconds)
    pub poll_interval_secs: u64,
    /// Name prefix of interfaces created by the 6LoWPAN bridge
    pub interface_prefix: String,
    /// How new interfaces are addressed
    pub address_plan: AddressPlan,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            interface_prefix: "bt".to_string(),
            address_plan: AddressPlan::default(),
        }
    }
}

impl ReconcilerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// One tracked bridge interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub name: String,
    /// Address the interface was given (or offered, if assignment failed)
    pub address: Option<Ipv6Net>,
    pub address_assigned: bool,
}

/// Changes made by one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Newly tracked interfaces
    pub added: Vec<String>,
    /// Interfaces no longer present
    pub removed: Vec<String>,
    /// New interfaces whose address assignment succeeded
    pub assigned: Vec<String>,
    /// New interfaces whose address assignment failed
    pub assignment_failed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Errors that stop the reconciler
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("interface enumeration failed: {0}")]
    Enumeration(#[source] HostError),
}

/// Owns the set of tracked bridge interfaces
#[derive(Debug)]
pub struct InterfaceReconciler {
    config: ReconcilerConfig,
    records: BTreeMap<String, InterfaceRecord>,
    allocator: AddressAllocator,
    polls: u64,
}

impl InterfaceReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        let allocator = AddressAllocator::new(config.address_plan.clone());
        Self {
            config,
            records: BTreeMap::new(),
            allocator,
            polls: 0,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn record(&self, name: &str) -> Option<&InterfaceRecord> {
        self.records.get(name)
    }

    pub fn records(&self) -> impl Iterator<Item = &InterfaceRecord> {
        self.records.values()
    }

    pub fn tracked(&self) -> usize {
        self.records.len()
    }

    /// Number of completed polls
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Whether `name` follows the bridge naming convention
    pub fn is_bridge_interface(&self, name: &str) -> bool {
        name.starts_with(&self.config.interface_prefix)
    }

    /// One reconciliation pass: prune vanished interfaces, then adopt new ones
    pub async fn poll_once(
        &mut self,
        host: &dyn HostNetwork,
    ) -> Result<ReconcileReport, ReconcileError> {
        let interfaces = host
            .list_interfaces()
            .await
            .map_err(ReconcileError::Enumeration)?;
        let present: HashSet<&str> = interfaces.iter().map(String::as_str).collect();
        let mut report = ReconcileReport::default();

        let vanished: Vec<String> = self
            .records
            .keys()
            .filter(|name| !present.contains(name.as_str()))
            .cloned()
            .collect();
        for name in vanished {
            self.records.remove(&name);
            self.allocator.release(&name);
            info!(interface = %name, "Bluetooth interface is no longer connected");
            report.removed.push(name);
        }

        for name in &interfaces {
            if !self.is_bridge_interface(name) || self.records.contains_key(name) {
                continue;
            }
            info!(interface = %name, "Found bluetooth interface");

            let address = self.allocator.lease(name);
            let mut record = InterfaceRecord {
                name: name.clone(),
                address,
                address_assigned: false,
            };

            match address {
                Some(address) => match host.assign_address(name, address).await {
                    Ok(()) => {
                        info!(interface = %name, %address, "Bluetooth IPv6 address registered");
                        record.address_assigned = true;
                        report.assigned.push(name.clone());
                    }
                    Err(e) => {
                        warn!(interface = %name, %address, "Failed to register IPv6 address: {}", e);
                        report.assignment_failed.push(name.clone());
                    }
                },
                None => {
                    warn!(
                        interface = %name,
                        plan = self.allocator.plan().name(),
                        "No address available for interface"
                    );
                    report.assignment_failed.push(name.clone());
                }
            }

            self.records.insert(name.clone(), record);
            report.added.push(name.clone());
        }

        self.polls += 1;
        Ok(report)
    }

    /// Poll every `poll_interval` until `shutdown` flips to `true`.
    ///
    /// The first poll runs immediately. Enumeration failure ends the loop.
    pub async fn run(
        &mut self,
        host: &dyn HostNetwork,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ReconcileError> {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(period = ?self.config.poll_interval(), "Interface reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.poll_once(host).await?;
                    if !report.is_empty() {
                        debug!(?report, tracked = self.tracked(), "Interface reconciliation");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Interface reconciler stopped");
                        return Ok(());
                    }
                }
            }
        }
    }
}
