// Host Bluetooth radio backed by btleplug
//
// btleplug drives the central (observer) role only, so this radio can scan
// but reports advertising as unsupported. Manufacturer data arrives keyed by
// company id with the 2-byte prefix already stripped; the decoder copes with
// either form.

use anyhow::{Context, Result};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::StreamExt;
use parking_lot::Mutex;
use rollcall_core::radio::{
    AdvertiseRequest, Advertisement, RadioBridge, RadioError, RadioEvent, ScanRequest,
};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct HostRadio {
    adapter: Adapter,
    company_id: Option<u16>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl HostRadio {
    /// Open the first Bluetooth adapter on this host
    pub async fn first_adapter(company_id: Option<u16>) -> Result<Self> {
        let manager = Manager::new()
            .await
            .context("Failed to open Bluetooth manager")?;
        let adapter = manager
            .adapters()
            .await
            .context("Failed to list Bluetooth adapters")?
            .into_iter()
            .next()
            .context("No Bluetooth adapter found")?;

        if let Ok(info) = adapter.adapter_info().await {
            info!("Using Bluetooth adapter {}", info);
        }

        Ok(Self {
            adapter,
            company_id,
            scan_task: Mutex::new(None),
        })
    }
}

fn platform_error(err: btleplug::Error) -> RadioError {
    RadioError::Platform(err.to_string())
}

/// Pick the manufacturer-data value carrying the session identifier
fn select_manufacturer_data(
    data: &HashMap<u16, Vec<u8>>,
    company_id: Option<u16>,
) -> Option<Vec<u8>> {
    if let Some(company) = company_id {
        if let Some(value) = data.get(&company) {
            return Some(value.clone());
        }
    }
    // Lowest company id keeps the choice stable between sightings
    data.iter()
        .min_by_key(|(company, _)| **company)
        .map(|(_, value)| value.clone())
}

async fn read_advertisement(
    adapter: &Adapter,
    id: &PeripheralId,
    company_id: Option<u16>,
) -> Option<Advertisement> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;

    Some(Advertisement {
        peer_id: format!("{:?}", id),
        rssi: properties.rssi,
        service_uuids: properties.services,
        manufacturer_data: select_manufacturer_data(&properties.manufacturer_data, company_id),
        local_name: properties.local_name,
    })
}

#[async_trait]
impl RadioBridge for HostRadio {
    async fn start_advertising(&self, _request: AdvertiseRequest) -> Result<(), RadioError> {
        Err(RadioError::Unsupported(
            "host stack only supports the observer role".to_string(),
        ))
    }

    async fn stop_advertising(&self) -> Result<(), RadioError> {
        Ok(())
    }

    async fn start_scan(
        &self,
        request: ScanRequest,
        events: mpsc::UnboundedSender<RadioEvent>,
    ) -> Result<(), RadioError> {
        if self.scan_task.lock().is_some() {
            return Err(RadioError::AlreadyRegistered);
        }

        let mut stream = self.adapter.events().await.map_err(platform_error)?;
        self.adapter
            .start_scan(ScanFilter {
                services: request.service_uuids.clone(),
            })
            .await
            .map_err(platform_error)?;

        let adapter = self.adapter.clone();
        let company_id = self.company_id;
        let task = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ManufacturerDataAdvertisement { id, .. }
                    | CentralEvent::ServicesAdvertisement { id, .. } => id,
                    _ => continue,
                };

                let Some(advertisement) = read_advertisement(&adapter, &id, company_id).await
                else {
                    debug!("No properties yet for {:?}", id);
                    continue;
                };
                if events.send(RadioEvent::Observed(advertisement)).is_err() {
                    return;
                }
            }

            warn!("Bluetooth event stream ended");
            let _ = events.send(RadioEvent::Failed(RadioError::Platform(
                "adapter event stream ended".to_string(),
            )));
        });

        *self.scan_task.lock() = Some(task);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        let task = self.scan_task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };
        task.abort();
        self.adapter.stop_scan().await.map_err(platform_error)
    }
}
