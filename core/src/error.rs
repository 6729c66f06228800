use thiserror::Error;

use crate::permissions::{Permission, Role};

/// Errors surfaced by the broadcaster and scanner state machines
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Permission denied for {role}: missing {}", format_missing(.missing))]
    PermissionDenied {
        role: Role,
        missing: Vec<Permission>,
    },
    #[error("Radio unavailable: {0}")]
    RadioUnavailable(String),
    #[error("Invalid filter key: {0}")]
    InvalidFilterKey(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn format_missing(missing: &[Permission]) -> String {
    missing
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ProtocolError {
    /// Permission errors can be retried once the user grants access
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ProtocolError::PermissionDenied { .. })
    }
}
