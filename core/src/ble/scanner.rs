//! BLE scan driver seam
//!
//! The radio stack is injected as a `ScanDriver` so the discovery task owns
//! its adapter handle explicitly (no global default adapter) and tests can
//! substitute a scripted scanner. Platform implementations live in the binary.

use super::filter::{DiscoveryFilter, FilterDecision};
use super::observation::DeviceObservation;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, trace};

/// Callback invoked by the driver for every advertisement it receives.
///
/// Drivers may call it from any thread; it never blocks.
pub type ObservationCallback = Arc<dyn Fn(DeviceObservation) + Send + Sync>;

/// Errors reported by scan drivers
#[derive(Error, Debug, Clone)]
pub enum ScanError {
    #[error("BLE adapter unavailable: {0}")]
    AdapterUnavailable(String),
    #[error("BLE adapter not enabled")]
    NotEnabled,
    #[error("BLE scan failed: {0}")]
    ScanFailed(String),
    #[error("BLE scan ended unexpectedly")]
    Ended,
}

/// Platform BLE radio abstraction
#[async_trait]
pub trait ScanDriver: Send {
    /// Power up / acquire the adapter. Failure is fatal to the gateway.
    async fn enable(&mut self) -> Result<(), ScanError>;

    /// Scan until the driver stops, invoking `on_result` for every advertisement
    async fn scan(&mut self, on_result: ObservationCallback) -> Result<(), ScanError>;
}

/// Enable the adapter and feed every scan result through the discovery filter.
///
/// Returns only on failure; a scan that ends on its own is reported as
/// [`ScanError::Ended`].
pub async fn run_discovery(
    driver: &mut dyn ScanDriver,
    filter: Arc<DiscoveryFilter>,
) -> Result<(), ScanError> {
    driver.enable().await?;
    info!("Scanning for IPSP devices...");

    let on_result: ObservationCallback = Arc::new(move |observation: DeviceObservation| {
        let address = observation.address.clone();
        let decision = filter.on_observation(observation);
        if decision == FilterDecision::NotIpsp {
            trace!(%address, "Ignored non-IPSP advertisement");
        }
    });

    driver.scan(on_result).await?;
    Err(ScanError::Ended)
}
