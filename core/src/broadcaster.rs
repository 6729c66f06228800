/// Session broadcaster state machine
///
/// Emits the encoded session identifier in the manufacturer-data field of a
/// continuous advertisement. Transitions are serialized; the advertised
/// identifier and state can be read without waiting on a transition.
///
/// Calling `start` while already advertising restarts the emission: the old
/// advertisement is withdrawn before the new one is registered, so the radio
/// never holds two registrations.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::codec::{self, SessionIdentifier};
use crate::config::ProtocolConfig;
use crate::error::ProtocolError;
use crate::filter::FilterKey;
use crate::permissions::{CapabilityGate, Role};
use crate::radio::{AdvertiseRequest, RadioBridge};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastState {
    Idle,
    Advertising,
}

impl fmt::Display for BroadcastState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastState::Idle => write!(f, "Idle"),
            BroadcastState::Advertising => write!(f, "Advertising"),
        }
    }
}

/// The broadcast currently on air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBroadcast {
    pub identifier: SessionIdentifier,
    pub filter_key: FilterKey,
    pub local_name: Option<String>,
}

pub struct Broadcaster {
    radio: Arc<dyn RadioBridge>,
    gate: CapabilityGate,
    config: ProtocolConfig,
    transition: Mutex<()>,
    active: RwLock<Option<ActiveBroadcast>>,
}

impl Broadcaster {
    pub fn new(
        radio: Arc<dyn RadioBridge>,
        gate: CapabilityGate,
        config: ProtocolConfig,
    ) -> Result<Self, ProtocolError> {
        config.validate()?;

        Ok(Self {
            radio,
            gate,
            config,
            transition: Mutex::new(()),
            active: RwLock::new(None),
        })
    }

    pub fn state(&self) -> BroadcastState {
        if self.active.read().is_some() {
            BroadcastState::Advertising
        } else {
            BroadcastState::Idle
        }
    }

    pub fn current(&self) -> Option<ActiveBroadcast> {
        self.active.read().clone()
    }

    /// Start advertising `identifier` under `filter_key`
    pub async fn start(
        &self,
        identifier: SessionIdentifier,
        filter_key: FilterKey,
    ) -> Result<(), ProtocolError> {
        self.start_named(identifier, filter_key, None).await
    }

    /// Start advertising with an optional session name
    ///
    /// The name is only put on air when `include_local_name` is configured.
    pub async fn start_named(
        &self,
        identifier: SessionIdentifier,
        filter_key: FilterKey,
        local_name: Option<String>,
    ) -> Result<(), ProtocolError> {
        let _guard = self.transition.lock().await;

        // A denial leaves any running broadcast untouched.
        self.gate.authorize(Role::Advertiser).await?;

        let restarting = self.active.read().is_some();
        if restarting {
            info!("Restarting broadcast with session {}", identifier);
            self.withdraw().await;
        }

        let local_name = local_name.filter(|_| self.config.include_local_name);
        let request = AdvertiseRequest {
            service_uuid: filter_key.uuid(),
            manufacturer_data: codec::build_payload(identifier, self.config.company_id),
            local_name: local_name.clone(),
            interval: self.config.advertising_interval(),
            tx_power: self.config.tx_power,
        };

        if let Err(e) = self.radio.start_advertising(request).await {
            warn!("Failed to start advertising session {}: {}", identifier, e);
            return Err(e.into());
        }

        *self.active.write() = Some(ActiveBroadcast {
            identifier,
            filter_key,
            local_name,
        });
        info!("Advertising session {} on {}", identifier, filter_key);
        Ok(())
    }

    /// Stop advertising; a no-op when idle
    pub async fn stop(&self) {
        let _guard = self.transition.lock().await;
        let idle = self.active.read().is_none();
        if idle {
            return;
        }
        self.withdraw().await;
        info!("Broadcast stopped");
    }

    async fn withdraw(&self) {
        if let Err(e) = self.radio.stop_advertising().await {
            warn!("Radio error while stopping advertisement: {}", e);
        }
        *self.active.write() = None;
    }
}
