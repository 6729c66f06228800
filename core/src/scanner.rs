/// Session scanner state machine
///
/// Observes nearby advertisements for one filter key, decodes the session
/// identifier from each new device, and hands the result to a sink. Each scan
/// session runs one delivery task that owns the dedup set; `stop` waits for
/// that task to finish, so no delivery happens after `stop` returns.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::{self, SessionIdentifier};
use crate::config::ProtocolConfig;
use crate::error::ProtocolError;
use crate::filter::FilterKey;
use crate::permissions::{CapabilityGate, Role};
use crate::radio::{Advertisement, RadioBridge, RadioEvent, ScanRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    Idle,
    Scanning,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Idle => write!(f, "Idle"),
            ScanState::Scanning => write!(f, "Scanning"),
        }
    }
}

/// First sighting of a broadcasting device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Platform device handle
    pub peer_id: String,
    /// RSSI in dBm, when the platform reports it
    pub signal_strength: Option<i16>,
    /// None when the manufacturer data was absent or too short
    pub session_identifier: Option<SessionIdentifier>,
    pub local_name: Option<String>,
}

/// Receiver for scan results
///
/// Called from the scanner's delivery task, never concurrently with itself.
/// A sink must not await `Scanner::stop` from inside `on_discovered`.
pub trait DiscoverySink: Send + Sync {
    fn on_discovered(&self, peer: DiscoveredPeer);

    /// The radio aborted the scan; the scanner is back to Idle
    fn on_scan_failed(&self, _error: ProtocolError) {}
}

impl<F> DiscoverySink for F
where
    F: Fn(DiscoveredPeer) + Send + Sync,
{
    fn on_discovered(&self, peer: DiscoveredPeer) {
        self(peer)
    }
}

struct ScanSession {
    filter_key: FilterKey,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct Scanner {
    radio: Arc<dyn RadioBridge>,
    gate: CapabilityGate,
    config: ProtocolConfig,
    session: Mutex<Option<ScanSession>>,
    state: Arc<RwLock<ScanState>>,
}

impl Scanner {
    pub fn new(radio: Arc<dyn RadioBridge>, gate: CapabilityGate, config: ProtocolConfig) -> Self {
        Self {
            radio,
            gate,
            config,
            session: Mutex::new(None),
            state: Arc::new(RwLock::new(ScanState::Idle)),
        }
    }

    pub fn state(&self) -> ScanState {
        *self.state.read()
    }

    /// Start scanning for `filter_key`; a no-op if already scanning
    pub async fn start(
        &self,
        filter_key: FilterKey,
        sink: impl DiscoverySink + 'static,
    ) -> Result<(), ProtocolError> {
        let mut slot = self.session.lock().await;

        if self.state() == ScanState::Scanning {
            if let Some(session) = slot.as_ref() {
                if session.filter_key != filter_key {
                    warn!(
                        "Scan already running for {}, ignoring start for {}",
                        session.filter_key, filter_key
                    );
                }
            }
            return Ok(());
        }

        // A session left behind by a radio failure: its task has finished but
        // the radio may still hold the registration.
        if let Some(stale) = slot.take() {
            if let Err(e) = self.radio.stop_scan().await {
                warn!("Radio error while releasing failed scan: {}", e);
            }
            let _ = stale.task.await;
        }

        self.gate.authorize(Role::Scanner).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let request = ScanRequest {
            service_uuids: vec![filter_key.uuid()],
            allow_duplicates: self.config.allow_duplicates,
        };
        if let Err(e) = self.radio.start_scan(request, events_tx).await {
            warn!("Failed to start scan for {}: {}", filter_key, e);
            return Err(e.into());
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.state.write() = ScanState::Scanning;
        let task = tokio::spawn(run_scan_loop(
            filter_key,
            events_rx,
            shutdown_rx,
            Arc::new(sink),
            Arc::clone(&self.state),
        ));

        *slot = Some(ScanSession {
            filter_key,
            shutdown: shutdown_tx,
            task,
        });
        info!("Scanning for sessions on {}", filter_key);
        Ok(())
    }

    /// Stop scanning and forget every sighting; a no-op when idle
    pub async fn stop(&self) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.take() else {
            return;
        };

        if let Err(e) = self.radio.stop_scan().await {
            warn!("Radio error while stopping scan: {}", e);
        }

        let _ = session.shutdown.send(());
        if let Err(e) = session.task.await {
            warn!("Scan delivery task ended abnormally: {}", e);
        }

        *self.state.write() = ScanState::Idle;
        info!("Scan stopped");
    }
}

async fn run_scan_loop(
    filter_key: FilterKey,
    mut events: mpsc::UnboundedReceiver<RadioEvent>,
    mut shutdown: oneshot::Receiver<()>,
    sink: Arc<dyn DiscoverySink>,
    state: Arc<RwLock<ScanState>>,
) {
    let mut seen = HashSet::new();

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Some(RadioEvent::Observed(advertisement)) => {
                    if let Some(peer) = observe(&filter_key, &mut seen, advertisement) {
                        sink.on_discovered(peer);
                    }
                }
                Some(RadioEvent::Failed(e)) => {
                    warn!("Scan aborted by radio: {}", e);
                    *state.write() = ScanState::Idle;
                    sink.on_scan_failed(e.into());
                    break;
                }
                None => {
                    debug!("Radio closed the scan channel");
                    *state.write() = ScanState::Idle;
                    break;
                }
            },
        }
    }
}

/// Filter, dedup and decode one observation
///
/// Returns the peer to deliver, or None if the advertisement is unrelated or
/// the device was already seen in this session.
pub(crate) fn observe(
    filter_key: &FilterKey,
    seen: &mut HashSet<String>,
    advertisement: Advertisement,
) -> Option<DiscoveredPeer> {
    if !filter_key.matches(&advertisement.service_uuids) {
        return None;
    }
    if seen.contains(&advertisement.peer_id) {
        return None;
    }

    let session_identifier = match advertisement.manufacturer_data.as_deref() {
        Some(data) => match codec::decode(data) {
            Ok(id) => Some(id),
            Err(e) => {
                debug!("Peer {} has undecodable payload: {}", advertisement.peer_id, e);
                None
            }
        },
        None => None,
    };

    seen.insert(advertisement.peer_id.clone());
    debug!(
        "Discovered {} (session {:?}, rssi {:?})",
        advertisement.peer_id, session_identifier, advertisement.rssi
    );

    Some(DiscoveredPeer {
        peer_id: advertisement.peer_id,
        signal_strength: advertisement.rssi,
        session_identifier,
        local_name: advertisement.local_name,
    })
}
