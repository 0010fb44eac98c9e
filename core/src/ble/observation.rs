//! BLE advertisement observations
//!
//! A `DeviceObservation` is one advertisement as reported by the scan driver.
//! Observations are immutable snapshots; the discovery filter decides whether
//! one becomes a connection candidate.

use std::fmt;
use tokio::time::Instant;
use uuid::Uuid;

/// Internet Protocol Support Service (Bluetooth SIG assigned number 0x1820)
pub const IPSP_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1820_0000_1000_8000_0080_5f9b_34fb);

/// Substring of the advertised local name that marks a device as IPSP-capable
/// when the service UUID is not part of the advertisement.
pub const IPSP_NAME_MARKER: &str = "IPSP";

/// One BLE advertisement seen by the scanner
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceObservation {
    /// Hardware address in string form (e.g. `AA:BB:CC:DD:EE:FF`)
    pub address: String,
    /// RSSI in dBm, when the driver reports it
    pub rssi: Option<i16>,
    /// Advertised local name
    pub name: Option<String>,
    /// Advertised service UUIDs
    pub service_uuids: Vec<Uuid>,
    /// When the advertisement was received
    pub observed_at: Instant,
}

impl DeviceObservation {
    /// Create an observation for `address` stamped with the current time
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            rssi: None,
            name: None,
            service_uuids: Vec::new(),
            observed_at: Instant::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    pub fn with_service(mut self, uuid: Uuid) -> Self {
        if !self.service_uuids.contains(&uuid) {
            self.service_uuids.push(uuid);
        }
        self
    }

    pub fn with_services(mut self, uuids: impl IntoIterator<Item = Uuid>) -> Self {
        for uuid in uuids {
            self = self.with_service(uuid);
        }
        self
    }

    /// Override the observation timestamp
    pub fn at(mut self, instant: Instant) -> Self {
        self.observed_at = instant;
        self
    }

    /// Advertised name, or a placeholder for anonymous devices
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    /// Whether this advertisement announces IP Support Profile capability
    pub fn is_ipsp_capable(&self) -> bool {
        is_ipsp_capable(self)
    }
}

impl fmt::Display for DeviceObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.display_name())?;
        if let Some(rssi) = self.rssi {
            write!(f, " {} dBm", rssi)?;
        }
        Ok(())
    }
}

/// IPSP predicate: the IPSP service UUID is advertised, or the name contains "IPSP"
pub fn is_ipsp_capable(observation: &DeviceObservation) -> bool {
    observation.service_uuids.contains(&IPSP_SERVICE_UUID)
        || observation
            .name
            .as_deref()
            .map_or(false, |name| name.contains(IPSP_NAME_MARKER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipsp_uuid_is_sig_base_uuid() {
        assert_eq!(
            IPSP_SERVICE_UUID.to_string(),
            "00001820-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_capable_by_service_uuid() {
        let obs = DeviceObservation::new("AA:BB:CC:DD:EE:FF").with_service(IPSP_SERVICE_UUID);
        assert!(obs.is_ipsp_capable());
    }

    #[test]
    fn test_capable_by_name() {
        let obs = DeviceObservation::new("AA:BB:CC:DD:EE:FF").with_name("nrf-IPSP-node");
        assert!(obs.is_ipsp_capable());
    }

    #[test]
    fn test_name_match_is_case_sensitive() {
        let obs = DeviceObservation::new("AA:BB:CC:DD:EE:FF").with_name("ipsp-lowercase");
        assert!(!obs.is_ipsp_capable());
    }

    #[test]
    fn test_not_capable_without_marker() {
        let heart_rate = Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);
        let obs = DeviceObservation::new("11:22:33:44:55:66")
            .with_name("thermostat")
            .with_service(heart_rate)
            .with_rssi(-40);
        assert!(!obs.is_ipsp_capable());
    }

    #[test]
    fn test_with_service_deduplicates() {
        let obs = DeviceObservation::new("AA:BB:CC:DD:EE:FF")
            .with_services([IPSP_SERVICE_UUID, IPSP_SERVICE_UUID]);
        assert_eq!(obs.service_uuids.len(), 1);
    }

    #[test]
    fn test_display() {
        let obs = DeviceObservation::new("AA:BB:CC:DD:EE:FF")
            .with_name("IPSP-sensor")
            .with_rssi(-61);
        assert_eq!(obs.to_string(), "AA:BB:CC:DD:EE:FF (IPSP-sensor) -61 dBm");

        let anon = DeviceObservation::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(anon.to_string(), "AA:BB:CC:DD:EE:FF (unnamed)");
    }
}
