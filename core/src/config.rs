//! Protocol settings shared by the broadcaster and scanner
//!
//! - Filter key (service UUID) that groups broadcasters and scanners
//! - Advertising interval and transmit power
//! - Optional company identifier prefixed to the manufacturer data

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ProtocolError;
use crate::filter::FilterKey;

/// Shortest legal BLE advertising interval
pub const MIN_ADVERTISING_INTERVAL_MS: u64 = 20;

/// Longest legal BLE advertising interval
pub const MAX_ADVERTISING_INTERVAL_MS: u64 = 10_240;

/// Default interval, matching the "balanced" advertise mode on Android
pub const DEFAULT_ADVERTISING_INTERVAL_MS: u64 = 250;

/// Advertising transmit power level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPower {
    Low,
    Medium,
    High,
}

impl Default for TxPower {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for TxPower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl FromStr for TxPower {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(ProtocolError::InvalidConfig(format!(
                "unknown tx power: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Service UUID carried by broadcasts and matched by scanners
    pub filter_key: FilterKey,
    /// Advertising interval in milliseconds
    pub advertising_interval_ms: u64,
    pub tx_power: TxPower,
    /// Company identifier prepended to the manufacturer data (little-endian)
    pub company_id: Option<u16>,
    /// Advertise the session name alongside the identifier
    pub include_local_name: bool,
    /// Ask the platform to report duplicate advertisements
    pub allow_duplicates: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            filter_key: FilterKey::default(),
            advertising_interval_ms: DEFAULT_ADVERTISING_INTERVAL_MS,
            tx_power: TxPower::default(),
            company_id: None,
            include_local_name: true,
            allow_duplicates: false,
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !(MIN_ADVERTISING_INTERVAL_MS..=MAX_ADVERTISING_INTERVAL_MS)
            .contains(&self.advertising_interval_ms)
        {
            return Err(ProtocolError::InvalidConfig(format!(
                "advertising interval must be {}-{} ms, got {}",
                MIN_ADVERTISING_INTERVAL_MS, MAX_ADVERTISING_INTERVAL_MS, self.advertising_interval_ms
            )));
        }
        Ok(())
    }

    pub fn advertising_interval(&self) -> Duration {
        Duration::from_millis(self.advertising_interval_ms)
    }
}
