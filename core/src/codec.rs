/// Session identifier codec for broadcast payloads
///
/// A session identifier is an opaque 32-bit value carried in the
/// manufacturer-data field of an advertisement as 4 big-endian bytes.
/// Some radio stacks hand the manufacturer data over with the 2-byte company
/// identifier still attached, others strip it, so the decoder always reads the
/// *last* 4 bytes of whatever it is given.
///
/// Compatibility risk: two broadcasters using different prefix lengths are
/// indistinguishable to this decoder. There is no canonical payload length;
/// any 4-byte tail is accepted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of bytes an encoded session identifier occupies
pub const IDENTIFIER_LEN: usize = 4;

/// Length of the optional company identifier prefix
pub const COMPANY_PREFIX_LEN: usize = 2;

/// Errors for payload decoding and identifier parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Payload too short: need {IDENTIFIER_LEN} bytes, got {len}")]
    PayloadTooShort { len: usize },
    #[error("Invalid session identifier: {0}")]
    InvalidIdentifier(String),
}

/// Opaque 32-bit session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionIdentifier(u32);

impl SessionIdentifier {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for SessionIdentifier {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<SessionIdentifier> for u32 {
    fn from(id: SessionIdentifier) -> Self {
        id.0
    }
}

impl fmt::Display for SessionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionIdentifier {
    type Err = DecodeError;

    /// Parse a decimal session id as held by the session record
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| DecodeError::InvalidIdentifier(s.to_string()))
    }
}

/// Encode an identifier as 4 big-endian bytes
pub fn encode(id: SessionIdentifier) -> [u8; IDENTIFIER_LEN] {
    id.0.to_be_bytes()
}

/// Decode the identifier from the last 4 bytes of a payload
///
/// Any leading bytes (vendor/company prefix of unknown length) are ignored.
pub fn decode(payload: &[u8]) -> Result<SessionIdentifier, DecodeError> {
    let len = payload.len();
    if len < IDENTIFIER_LEN {
        return Err(DecodeError::PayloadTooShort { len });
    }

    let mut tail = [0u8; IDENTIFIER_LEN];
    tail.copy_from_slice(&payload[len - IDENTIFIER_LEN..]);
    Ok(SessionIdentifier(u32::from_be_bytes(tail)))
}

/// Build a full manufacturer-data value
///
/// With a company id the value is `[company LE (2)] ++ [identifier BE (4)]`,
/// the Bluetooth SIG layout for stacks that carry the company id inline.
pub fn build_payload(id: SessionIdentifier, company_id: Option<u16>) -> Vec<u8> {
    let mut payload = Vec::with_capacity(COMPANY_PREFIX_LEN + IDENTIFIER_LEN);
    if let Some(company) = company_id {
        payload.extend_from_slice(&company.to_le_bytes());
    }
    payload.extend_from_slice(&encode(id));
    payload
}
