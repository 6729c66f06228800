//! Caller-side lifecycle helpers
//!
//! The presenter side ties a broadcast to a live session record and guards
//! leaving the session screen; the attendee side collects discovered peers
//! and resolves session names through an external directory.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::broadcaster::Broadcaster;
use crate::codec::{DecodeError, SessionIdentifier};
use crate::error::ProtocolError;
use crate::filter::FilterKey;
use crate::scanner::{DiscoveredPeer, DiscoverySink, Scanner};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Identifier(#[from] DecodeError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Peer {0} did not advertise a session identifier")]
    MissingIdentifier(String),
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
}

/// Session record as held by the external layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Decimal session id
    pub id: String,
    pub name: String,
    pub is_active: bool,
}

/// Outcome of a request to leave the presenter screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// Broadcast is stopped; navigation may continue
    Proceed,
    /// Session is still live; ask the user before leaving
    NeedsConfirmation,
}

// ============================================================================
// PRESENTER
// ============================================================================

pub struct PresenterSession {
    broadcaster: Arc<Broadcaster>,
    filter_key: FilterKey,
    info: Option<SessionInfo>,
}

impl PresenterSession {
    pub fn new(broadcaster: Arc<Broadcaster>, filter_key: FilterKey) -> Self {
        Self {
            broadcaster,
            filter_key,
            info: None,
        }
    }

    /// Bring the broadcast in line with the session record
    ///
    /// Active sessions are advertised under their id and name; anything else
    /// stops the broadcast.
    pub async fn sync(&mut self, info: SessionInfo) -> Result<(), SessionError> {
        if info.is_active {
            let identifier: SessionIdentifier = info.id.parse()?;
            self.broadcaster
                .start_named(identifier, self.filter_key, Some(info.name.clone()))
                .await?;
        } else {
            self.broadcaster.stop().await;
        }
        self.info = Some(info);
        Ok(())
    }

    /// Guard navigation away from a live session
    ///
    /// Without confirmation an active session keeps broadcasting and the
    /// caller must ask the user; otherwise the broadcast is stopped before
    /// navigation proceeds.
    pub async fn request_exit(&mut self, confirmed: bool) -> ExitDecision {
        let active = self.info.as_ref().map(|i| i.is_active).unwrap_or(false);
        if active && !confirmed {
            return ExitDecision::NeedsConfirmation;
        }
        self.broadcaster.stop().await;
        ExitDecision::Proceed
    }

    /// Session ended; stop broadcasting unconditionally
    pub async fn end(&mut self) {
        if let Some(info) = self.info.as_mut() {
            info.is_active = false;
            info!("Session {} ended", info.id);
        }
        self.broadcaster.stop().await;
    }

    pub fn is_live(&self) -> bool {
        self.broadcaster.current().is_some()
    }

    pub fn info(&self) -> Option<&SessionInfo> {
        self.info.as_ref()
    }
}

// ============================================================================
// ATTENDEE
// ============================================================================

/// Lookup of human-readable session names by identifier
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn session_name(&self, id: SessionIdentifier) -> anyhow::Result<String>;
}

struct CollectingSink {
    peers: Arc<RwLock<Vec<DiscoveredPeer>>>,
}

impl DiscoverySink for CollectingSink {
    fn on_discovered(&self, peer: DiscoveredPeer) {
        self.peers.write().push(peer);
    }

    fn on_scan_failed(&self, error: ProtocolError) {
        warn!("Discovery interrupted: {}", error);
    }
}

pub struct AttendeeSession {
    scanner: Arc<Scanner>,
    filter_key: FilterKey,
    peers: Arc<RwLock<Vec<DiscoveredPeer>>>,
    names: RwLock<HashMap<SessionIdentifier, String>>,
}

impl AttendeeSession {
    pub fn new(scanner: Arc<Scanner>, filter_key: FilterKey) -> Self {
        Self {
            scanner,
            filter_key,
            peers: Arc::new(RwLock::new(Vec::new())),
            names: RwLock::new(HashMap::new()),
        }
    }

    /// Begin a fresh discovery pass
    pub async fn start(&self) -> Result<(), ProtocolError> {
        self.scanner.stop().await;
        self.peers.write().clear();
        self.scanner
            .start(
                self.filter_key,
                CollectingSink {
                    peers: Arc::clone(&self.peers),
                },
            )
            .await
    }

    pub async fn stop(&self) {
        self.scanner.stop().await;
    }

    /// Peers in discovery order
    pub fn peers(&self) -> Vec<DiscoveredPeer> {
        self.peers.read().clone()
    }

    /// Look up names for identifiers not resolved yet
    ///
    /// Each identifier is looked up at most once successfully; failures are
    /// logged and retried on the next call. Returns the number newly resolved.
    pub async fn resolve_names(&self, directory: &dyn SessionDirectory) -> usize {
        let pending: Vec<SessionIdentifier> = {
            let names = self.names.read();
            let mut ids: Vec<SessionIdentifier> = Vec::new();
            for id in self.peers.read().iter().filter_map(|p| p.session_identifier) {
                if !names.contains_key(&id) && !ids.contains(&id) {
                    ids.push(id);
                }
            }
            ids
        };

        let mut resolved = 0;
        for id in pending {
            match directory.session_name(id).await {
                Ok(name) => {
                    self.names.write().insert(id, name);
                    resolved += 1;
                }
                Err(e) => warn!("Failed to fetch name for session {}: {}", id, e),
            }
        }
        resolved
    }

    pub fn session_name(&self, id: SessionIdentifier) -> Option<String> {
        self.names.read().get(&id).cloned()
    }

    /// Identifier to act on for a chosen peer
    pub fn select(&self, peer_id: &str) -> Result<SessionIdentifier, SessionError> {
        let peers = self.peers.read();
        let peer = peers
            .iter()
            .find(|p| p.peer_id == peer_id)
            .ok_or_else(|| SessionError::UnknownPeer(peer_id.to_string()))?;
        peer.session_identifier
            .ok_or_else(|| SessionError::MissingIdentifier(peer_id.to_string()))
    }
}
