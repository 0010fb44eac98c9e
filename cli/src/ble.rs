// btleplug scan driver
//
// Feeds every advertisement the host adapter reports into the gateway's
// discovery callback. Works wherever btleplug does (BlueZ, CoreBluetooth,
// WinRT), though the 6LoWPAN bridge itself is Linux-only.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::StreamExt;
use ipsp_gateway_core::{DeviceObservation, ObservationCallback, ScanDriver, ScanError};

pub struct BtleplugScanner {
    adapter_index: usize,
    adapter: Option<Adapter>,
}

impl BtleplugScanner {
    pub fn new(adapter_index: usize) -> Self {
        Self {
            adapter_index,
            adapter: None,
        }
    }

    async fn observe(adapter: &Adapter, id: &PeripheralId) -> Option<DeviceObservation> {
        let peripheral = adapter.peripheral(id).await.ok()?;
        let properties = peripheral.properties().await.ok()??;

        let mut observation =
            DeviceObservation::new(properties.address.to_string()).with_services(properties.services);
        if let Some(name) = properties.local_name {
            observation = observation.with_name(name);
        }
        if let Some(rssi) = properties.rssi {
            observation = observation.with_rssi(rssi);
        }
        Some(observation)
    }
}

#[async_trait]
impl ScanDriver for BtleplugScanner {
    async fn enable(&mut self) -> Result<(), ScanError> {
        let manager = Manager::new()
            .await
            .map_err(|e| ScanError::AdapterUnavailable(format!("BLE manager init failed: {}", e)))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| ScanError::AdapterUnavailable(format!("Failed to list BLE adapters: {}", e)))?;
        let adapter = adapters.into_iter().nth(self.adapter_index).ok_or_else(|| {
            ScanError::AdapterUnavailable(format!("No BLE adapter at index {}", self.adapter_index))
        })?;

        match adapter.adapter_info().await {
            Ok(info) => tracing::info!(adapter = %info, "BLE adapter enabled"),
            Err(e) => tracing::debug!("Adapter info unavailable: {}", e),
        }
        self.adapter = Some(adapter);
        Ok(())
    }

    async fn scan(&mut self, on_result: ObservationCallback) -> Result<(), ScanError> {
        let adapter = self.adapter.as_ref().ok_or(ScanError::NotEnabled)?;

        let mut events = adapter
            .events()
            .await
            .map_err(|e| ScanError::ScanFailed(format!("Failed to subscribe to events: {}", e)))?;
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ScanError::ScanFailed(format!("Failed to start BLE scan: {}", e)))?;

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                CentralEvent::ServicesAdvertisement { id, .. } => id,
                _ => continue,
            };
            if let Some(observation) = Self::observe(adapter, &id).await {
                on_result(observation);
            }
        }

        let _ = adapter.stop_scan().await;
        Ok(())
    }
}
