// Platform radio abstraction
//
// Every platform call the protocol needs goes through RadioBridge. The
// broadcaster and scanner only hold an `Arc<dyn RadioBridge>`, so the same
// state machines run against the simulated air in tests and against a real
// host stack in the CLI.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::TxPower;
use crate::error::ProtocolError;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RadioError {
    #[error("Bluetooth adapter is powered off")]
    PoweredOff,
    #[error("Operation not supported by this radio: {0}")]
    Unsupported(String),
    #[error("Radio already registered for this role")]
    AlreadyRegistered,
    #[error("Platform error: {0}")]
    Platform(String),
}

impl From<RadioError> for ProtocolError {
    fn from(err: RadioError) -> Self {
        ProtocolError::RadioUnavailable(err.to_string())
    }
}

// ============================================================================
// REQUESTS AND OBSERVATIONS
// ============================================================================

/// Everything the radio needs to emit one advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseRequest {
    /// Service identifier scanners filter on
    pub service_uuid: Uuid,
    /// Manufacturer-data value, already encoded
    pub manufacturer_data: Vec<u8>,
    /// Optional human-readable name carried in the scan response
    pub local_name: Option<String>,
    /// Advertising interval
    pub interval: Duration,
    pub tx_power: TxPower,
}

/// Passive observation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    /// Services the platform may pre-filter on (the scanner filters again)
    pub service_uuids: Vec<Uuid>,
    /// Ask the platform to report repeated advertisements from one device
    pub allow_duplicates: bool,
}

/// One advertisement as reported by the platform radio stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Platform-assigned device handle
    pub peer_id: String,
    /// Received signal strength in dBm
    pub rssi: Option<i16>,
    /// Advertised service identifiers
    pub service_uuids: Vec<Uuid>,
    /// Raw manufacturer-data field, prefix included if the stack keeps it
    pub manufacturer_data: Option<Vec<u8>>,
    pub local_name: Option<String>,
}

impl Advertisement {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            rssi: None,
            service_uuids: Vec::new(),
            manufacturer_data: None,
            local_name: None,
        }
    }

    pub fn with_service(mut self, uuid: Uuid) -> Self {
        self.service_uuids.push(uuid);
        self
    }

    pub fn with_manufacturer_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.manufacturer_data = Some(data.into());
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }
}

/// Events pushed by the radio while a scan is registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Observed(Advertisement),
    /// The platform aborted the scan; no further events follow
    Failed(RadioError),
}

// ============================================================================
// PLATFORM BRIDGE TRAIT
// ============================================================================

/// Platform-specific radio operations for both protocol roles
///
/// Calls return once the request is registered with the platform stack;
/// emission and observation continue asynchronously until the matching stop
/// call. Observations are delivered through the sender handed to
/// `start_scan`, in the order the stack reports them.
#[async_trait]
pub trait RadioBridge: Send + Sync {
    async fn start_advertising(&self, request: AdvertiseRequest) -> Result<(), RadioError>;

    /// Stop advertising; Ok if nothing was registered
    async fn stop_advertising(&self) -> Result<(), RadioError>;

    async fn start_scan(
        &self,
        request: ScanRequest,
        events: mpsc::UnboundedSender<RadioEvent>,
    ) -> Result<(), RadioError>;

    /// Stop scanning; Ok if nothing was registered
    async fn stop_scan(&self) -> Result<(), RadioError>;
}
