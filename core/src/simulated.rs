// In-memory radio for tests and demos
//
// SimulatedAir stands in for the shared radio environment. Each device gets
// a SimulatedRadio bound to the air; advertisements registered by one device
// are delivered to every other device's scan on `sweep()`, and arbitrary
// advertisements can be injected to model foreign broadcasters.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::permissions::{Permission, PermissionRequester, PermissionStatus};
use crate::radio::{
    AdvertiseRequest, Advertisement, RadioBridge, RadioError, RadioEvent, ScanRequest,
};

/// RSSI reported for swept advertisements
pub const SIMULATED_RSSI: i16 = -60;

struct ScanSubscription {
    request: ScanRequest,
    events: mpsc::UnboundedSender<RadioEvent>,
}

#[derive(Default)]
struct AirState {
    advertisers: HashMap<String, AdvertiseRequest>,
    scanners: HashMap<String, ScanSubscription>,
}

/// Shared in-memory radio environment
#[derive(Default)]
pub struct SimulatedAir {
    state: Mutex<AirState>,
}

impl SimulatedAir {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Radio for one simulated device on this air
    pub fn radio(self: &Arc<Self>, device_id: impl Into<String>) -> SimulatedRadio {
        SimulatedRadio {
            device_id: device_id.into(),
            air: Arc::clone(self),
            available: AtomicBool::new(true),
            advertise_registrations: AtomicUsize::new(0),
            scan_registrations: AtomicUsize::new(0),
        }
    }

    /// Deliver an advertisement to every registered scan
    ///
    /// Returns the number of scans that received it.
    pub fn inject(&self, advertisement: Advertisement) -> usize {
        let mut state = self.state.lock();
        let mut delivered = 0;
        state.scanners.retain(|_, sub| {
            let ok = sub
                .events
                .send(RadioEvent::Observed(advertisement.clone()))
                .is_ok();
            delivered += ok as usize;
            ok
        });
        delivered
    }

    /// Deliver every active advertisement once to every other device's scan
    pub fn sweep(&self) -> usize {
        let mut state = self.state.lock();
        let AirState {
            advertisers,
            scanners,
        } = &mut *state;

        let mut delivered = 0;
        for (advertiser_id, request) in advertisers.iter() {
            let mut observed = Advertisement::new(advertiser_id.clone())
                .with_service(request.service_uuid)
                .with_manufacturer_data(request.manufacturer_data.clone())
                .with_rssi(SIMULATED_RSSI);
            observed.local_name = request.local_name.clone();

            scanners.retain(|scanner_id, sub| {
                if scanner_id == advertiser_id {
                    return true;
                }
                if !sub.request.service_uuids.is_empty()
                    && !sub.request.service_uuids.contains(&request.service_uuid)
                {
                    return true;
                }
                let ok = sub
                    .events
                    .send(RadioEvent::Observed(observed.clone()))
                    .is_ok();
                delivered += ok as usize;
                ok
            });
        }
        delivered
    }

    /// Abort every registered scan with a platform failure
    pub fn fail_scans(&self, reason: &str) {
        let mut state = self.state.lock();
        for (_, sub) in state.scanners.drain() {
            let _ = sub
                .events
                .send(RadioEvent::Failed(RadioError::Platform(reason.to_string())));
        }
    }

    /// Periodically sweep the air until the handle is aborted
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let air = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let delivered = air.sweep();
                if delivered > 0 {
                    debug!("Simulated sweep delivered {} advertisements", delivered);
                }
            }
        })
    }

    pub fn is_advertising(&self, device_id: &str) -> bool {
        self.state.lock().advertisers.contains_key(device_id)
    }

    pub fn advertisement(&self, device_id: &str) -> Option<AdvertiseRequest> {
        self.state.lock().advertisers.get(device_id).cloned()
    }

    pub fn is_scanning(&self, device_id: &str) -> bool {
        self.state.lock().scanners.contains_key(device_id)
    }
}

/// One device's radio on a SimulatedAir
pub struct SimulatedRadio {
    device_id: String,
    air: Arc<SimulatedAir>,
    available: AtomicBool,
    advertise_registrations: AtomicUsize,
    scan_registrations: AtomicUsize,
}

impl SimulatedRadio {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Make subsequent start calls fail as if the adapter were off
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Successful `start_advertising` calls so far
    pub fn advertise_registrations(&self) -> usize {
        self.advertise_registrations.load(Ordering::SeqCst)
    }

    /// Successful `start_scan` calls so far
    pub fn scan_registrations(&self) -> usize {
        self.scan_registrations.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<(), RadioError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RadioError::PoweredOff)
        }
    }
}

#[async_trait]
impl RadioBridge for SimulatedRadio {
    async fn start_advertising(&self, request: AdvertiseRequest) -> Result<(), RadioError> {
        self.ensure_available()?;

        let mut state = self.air.state.lock();
        if state.advertisers.contains_key(&self.device_id) {
            return Err(RadioError::AlreadyRegistered);
        }
        info!(
            "[sim:{}] Advertising {:02X?} on {}",
            self.device_id, request.manufacturer_data, request.service_uuid
        );
        state.advertisers.insert(self.device_id.clone(), request);
        self.advertise_registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), RadioError> {
        if self.air.state.lock().advertisers.remove(&self.device_id).is_some() {
            info!("[sim:{}] Stopped advertising", self.device_id);
        }
        Ok(())
    }

    async fn start_scan(
        &self,
        request: ScanRequest,
        events: mpsc::UnboundedSender<RadioEvent>,
    ) -> Result<(), RadioError> {
        self.ensure_available()?;

        let mut state = self.air.state.lock();
        if state.scanners.contains_key(&self.device_id) {
            return Err(RadioError::AlreadyRegistered);
        }
        info!("[sim:{}] Scanning for {:?}", self.device_id, request.service_uuids);
        state
            .scanners
            .insert(self.device_id.clone(), ScanSubscription { request, events });
        self.scan_registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        if self.air.state.lock().scanners.remove(&self.device_id).is_some() {
            info!("[sim:{}] Stopped scanning", self.device_id);
        }
        Ok(())
    }
}

/// Permission requester with fixed answers
///
/// Permissions not explicitly denied are granted.
#[derive(Default)]
pub struct StaticPermissions {
    denied: Vec<Permission>,
    requests: AtomicUsize,
}

impl StaticPermissions {
    pub fn grant_all() -> Self {
        Self::default()
    }

    pub fn denying(denied: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            denied: denied.into_iter().collect(),
            requests: AtomicUsize::new(0),
        }
    }

    /// Number of batch prompts shown so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionRequester for StaticPermissions {
    async fn request(&self, permissions: &[Permission]) -> HashMap<Permission, PermissionStatus> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        permissions
            .iter()
            .map(|p| {
                let status = if self.denied.contains(p) {
                    PermissionStatus::Denied
                } else {
                    PermissionStatus::Granted
                };
                (*p, status)
            })
            .collect()
    }
}
