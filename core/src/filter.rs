//! Protocol-level grouping token shared by broadcaster and scanner.
//!
//! The filter key is a service UUID. It may be written in full form
//! (`0000180D-0000-1000-8000-00805F9B34FB`) or as a 16-bit short form
//! (`180D` / `0x180D`), which expands onto the Bluetooth base UUID.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ProtocolError;

/// Well-known filter key used when none is configured
pub const DEFAULT_FILTER_KEY: &str = "0000180D-0000-1000-8000-00805F9B34FB";

/// Bluetooth base UUID with the 16-bit slot zeroed
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Parsed service filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FilterKey(Uuid);

impl FilterKey {
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Expand a 16-bit assigned number onto the base UUID
    pub const fn from_short(short: u16) -> Self {
        Self(Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96)))
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// True if any advertised service identifier equals this key
    pub fn matches(&self, services: &[Uuid]) -> bool {
        services.iter().any(|s| *s == self.0)
    }
}

impl Default for FilterKey {
    fn default() -> Self {
        Self::from_short(0x180D)
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated().to_string().to_uppercase())
    }
}

impl FromStr for FilterKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if hex.len() == 4 {
            return u16::from_str_radix(hex, 16)
                .map(Self::from_short)
                .map_err(|_| ProtocolError::InvalidFilterKey(s.to_string()));
        }

        Uuid::parse_str(trimmed)
            .map(Self)
            .map_err(|_| ProtocolError::InvalidFilterKey(s.to_string()))
    }
}

impl TryFrom<String> for FilterKey {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FilterKey> for String {
    fn from(key: FilterKey) -> Self {
        key.to_string()
    }
}
