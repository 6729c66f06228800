// Rollcall core — proximity broadcast & discovery
//
// A presenter advertises a 32-bit session identifier over BLE; nearby
// devices scan for it, decode it and hand it to the application. Nothing is
// paired, nothing is acknowledged: a one-way beacon plus passive observation.

#![allow(clippy::empty_line_after_doc_comments)]

pub mod broadcaster;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod permissions;
pub mod radio;
pub mod scanner;
pub mod session;
pub mod simulated;

pub use broadcaster::{ActiveBroadcast, BroadcastState, Broadcaster};
pub use codec::{decode, encode, DecodeError, SessionIdentifier};
pub use config::{ProtocolConfig, TxPower};
pub use error::ProtocolError;
pub use filter::{FilterKey, DEFAULT_FILTER_KEY};
pub use permissions::{
    required_permissions, CapabilityGate, Permission, PermissionRequester, PermissionSet,
    PermissionStatus, Platform, Role,
};
pub use radio::{AdvertiseRequest, Advertisement, RadioBridge, RadioError, RadioEvent, ScanRequest};
pub use scanner::{DiscoveredPeer, DiscoverySink, ScanState, Scanner};
pub use session::{
    AttendeeSession, ExitDecision, PresenterSession, SessionDirectory, SessionError, SessionInfo,
};
