/// Capability gate for radio operations
///
/// Determines which runtime permissions the current platform requires for
/// advertising or scanning, requests them in one batch, and fails closed if
/// any single permission is not granted. No retries: a denial is returned to
/// the caller, who decides whether to ask again.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ProtocolError;

/// First Android API level with the dedicated Bluetooth permissions (Android 12)
pub const API_BLUETOOTH_PERMISSIONS: u32 = 31;

/// First Android API level with runtime permissions (Android 6.0)
pub const API_RUNTIME_PERMISSIONS: u32 = 23;

/// Which side of the protocol is asking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Advertiser,
    Scanner,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Advertiser => write!(f, "advertiser"),
            Role::Scanner => write!(f, "scanner"),
        }
    }
}

/// Named platform capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    BluetoothScan,
    BluetoothConnect,
    BluetoothAdvertise,
    AccessFineLocation,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::BluetoothScan => "android.permission.BLUETOOTH_SCAN",
            Permission::BluetoothConnect => "android.permission.BLUETOOTH_CONNECT",
            Permission::BluetoothAdvertise => "android.permission.BLUETOOTH_ADVERTISE",
            Permission::AccessFineLocation => "android.permission.ACCESS_FINE_LOCATION",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform answer for a single permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// Denied with "don't ask again"
    NeverAskAgain,
}

/// Ordered set of permissions required for one operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    permissions: Vec<Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a permission, keeping first-insertion order
    pub fn insert(&mut self, permission: Permission) {
        if !self.permissions.contains(&permission) {
            self.permissions.push(permission);
        }
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter()
    }

    pub fn as_slice(&self) -> &[Permission] {
        &self.permissions
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = PermissionSet::new();
        for permission in iter {
            set.insert(permission);
        }
        set
    }
}

/// Host platform the gate evaluates against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Platform {
    Android { api_level: u32 },
    Ios,
    Desktop,
}

impl Platform {
    /// Permissions this platform requires for `role`
    ///
    /// Only Android has runtime Bluetooth permissions; iOS prompts on first
    /// radio use and desktop hosts have none.
    pub fn required_permissions(&self, role: Role) -> PermissionSet {
        match self {
            Platform::Android { api_level } => required_permissions(role, *api_level),
            Platform::Ios | Platform::Desktop => PermissionSet::new(),
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::Desktop
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Android { api_level } => write!(f, "android (api {})", api_level),
            Platform::Ios => write!(f, "ios"),
            Platform::Desktop => write!(f, "desktop"),
        }
    }
}

/// Android permission table for a role at a given API level
pub fn required_permissions(role: Role, platform_version: u32) -> PermissionSet {
    let mut set = PermissionSet::new();
    match role {
        Role::Scanner => {
            if platform_version >= API_BLUETOOTH_PERMISSIONS {
                set.insert(Permission::BluetoothScan);
                set.insert(Permission::BluetoothConnect);
            } else if platform_version >= API_RUNTIME_PERMISSIONS {
                set.insert(Permission::AccessFineLocation);
            }
        }
        Role::Advertiser => {
            if platform_version >= API_BLUETOOTH_PERMISSIONS {
                set.insert(Permission::BluetoothScan);
                set.insert(Permission::BluetoothConnect);
                set.insert(Permission::BluetoothAdvertise);
            } else {
                set.insert(Permission::AccessFineLocation);
            }
        }
    }
    set
}

/// Platform-specific runtime permission prompt
///
/// Implementations show the platform dialog for all permissions at once and
/// report the per-permission outcome. Permissions absent from the answer are
/// treated as denied.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionRequester: Send + Sync {
    async fn request(&self, permissions: &[Permission]) -> HashMap<Permission, PermissionStatus>;
}

/// Fail-closed permission gate
#[derive(Clone)]
pub struct CapabilityGate {
    platform: Platform,
    requester: Arc<dyn PermissionRequester>,
}

impl CapabilityGate {
    pub fn new(platform: Platform, requester: Arc<dyn PermissionRequester>) -> Self {
        Self {
            platform,
            requester,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Permissions required for `role`, computed fresh each call
    pub fn required(&self, role: Role) -> PermissionSet {
        self.platform.required_permissions(role)
    }

    /// Request every permission in one batch; true only if all are granted
    pub async fn request_and_check(&self, permissions: &PermissionSet) -> bool {
        self.missing(permissions).await.is_empty()
    }

    /// Gate `role`, returning exactly the permissions that were not granted
    pub async fn authorize(&self, role: Role) -> Result<(), ProtocolError> {
        let required = self.required(role);
        let missing = self.missing(&required).await;

        if missing.is_empty() {
            debug!("{} permissions granted on {}", role, self.platform);
            return Ok(());
        }

        warn!(
            "{} permissions denied on {}: {:?}",
            role, self.platform, missing
        );
        Err(ProtocolError::PermissionDenied { role, missing })
    }

    async fn missing(&self, permissions: &PermissionSet) -> Vec<Permission> {
        if permissions.is_empty() {
            return Vec::new();
        }

        let answers = self.requester.request(permissions.as_slice()).await;
        permissions
            .iter()
            .filter(|p| answers.get(*p) != Some(&PermissionStatus::Granted))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granted_all(permissions: &[Permission]) -> HashMap<Permission, PermissionStatus> {
        permissions
            .iter()
            .map(|p| (*p, PermissionStatus::Granted))
            .collect()
    }

    #[test]
    fn test_scanner_table() {
        let modern = required_permissions(Role::Scanner, 31);
        assert_eq!(
            modern.as_slice(),
            &[Permission::BluetoothScan, Permission::BluetoothConnect]
        );

        for level in [23, 28, 30] {
            let set = required_permissions(Role::Scanner, level);
            assert_eq!(set.as_slice(), &[Permission::AccessFineLocation]);
        }

        assert!(required_permissions(Role::Scanner, 22).is_empty());
        assert!(required_permissions(Role::Scanner, 0).is_empty());
    }

    #[test]
    fn test_advertiser_table() {
        let modern = required_permissions(Role::Advertiser, 34);
        assert_eq!(
            modern.as_slice(),
            &[
                Permission::BluetoothScan,
                Permission::BluetoothConnect,
                Permission::BluetoothAdvertise
            ]
        );

        for level in [21, 23, 30] {
            let set = required_permissions(Role::Advertiser, level);
            assert_eq!(set.as_slice(), &[Permission::AccessFineLocation]);
        }
    }

    #[test]
    fn test_non_android_platforms_need_nothing() {
        assert!(Platform::Ios.required_permissions(Role::Advertiser).is_empty());
        assert!(Platform::Desktop.required_permissions(Role::Scanner).is_empty());
    }

    #[test]
    fn test_permission_set_keeps_order_and_dedups() {
        let set: PermissionSet = [
            Permission::BluetoothConnect,
            Permission::BluetoothScan,
            Permission::BluetoothConnect,
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.as_slice(),
            &[Permission::BluetoothConnect, Permission::BluetoothScan]
        );
    }

    #[tokio::test]
    async fn test_request_and_check_all_granted() {
        let mut requester = MockPermissionRequester::new();
        requester
            .expect_request()
            .times(1)
            .returning(|perms| granted_all(perms));

        let gate = CapabilityGate::new(Platform::Android { api_level: 33 }, Arc::new(requester));
        let required = gate.required(Role::Scanner);
        assert!(gate.request_and_check(&required).await);
    }

    #[tokio::test]
    async fn test_single_denial_fails_whole_batch() {
        let mut requester = MockPermissionRequester::new();
        requester.expect_request().times(1).returning(|perms| {
            let mut answers = granted_all(perms);
            answers.insert(Permission::BluetoothAdvertise, PermissionStatus::Denied);
            answers
        });

        let gate = CapabilityGate::new(Platform::Android { api_level: 33 }, Arc::new(requester));
        let err = gate
            .authorize(Role::Advertiser)
            .await
            .expect_err("advertise denied");
        assert_eq!(
            err,
            ProtocolError::PermissionDenied {
                role: Role::Advertiser,
                missing: vec![Permission::BluetoothAdvertise],
            }
        );
    }

    #[tokio::test]
    async fn test_missing_answer_counts_as_denied() {
        let mut requester = MockPermissionRequester::new();
        requester
            .expect_request()
            .times(1)
            .returning(|_| HashMap::new());

        let gate = CapabilityGate::new(Platform::Android { api_level: 29 }, Arc::new(requester));
        let required = gate.required(Role::Scanner);
        assert!(!gate.request_and_check(&required).await);
    }

    #[tokio::test]
    async fn test_empty_set_skips_platform_prompt() {
        let mut requester = MockPermissionRequester::new();
        requester.expect_request().times(0);

        let gate = CapabilityGate::new(Platform::Android { api_level: 21 }, Arc::new(requester));
        assert!(gate.authorize(Role::Scanner).await.is_ok());
    }

    #[tokio::test]
    async fn test_never_ask_again_is_denial() {
        let mut requester = MockPermissionRequester::new();
        requester.expect_request().returning(|perms| {
            perms
                .iter()
                .map(|p| (*p, PermissionStatus::NeverAskAgain))
                .collect()
        });

        let gate = CapabilityGate::new(Platform::Android { api_level: 26 }, Arc::new(requester));
        let err = gate.authorize(Role::Scanner).await.expect_err("denied");
        assert!(err.is_permission_denied());
    }
}
