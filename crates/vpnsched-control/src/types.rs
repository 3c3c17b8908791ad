use serde::Serialize;

use crate::error::ControlError;

/// A profile known to the control service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VpnProfile {
    /// Opaque identifier used in every profile-specific call.
    pub id: String,
    /// Human-readable name, matched exactly against schedule arguments.
    pub name: String,
}

/// Which of the two permission checks a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionGate {
    /// Application-level permission to use the control API at all.
    Api,
    /// Service-level permission to operate a VPN tunnel.
    Vpn,
}

impl std::fmt::Display for PermissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionGate::Api => f.write_str("api"),
            PermissionGate::Vpn => f.write_str("vpn"),
        }
    }
}

/// Opaque permission request to surface to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequest {
    pub gate: PermissionGate,
    pub token: String,
}

/// Status notification pushed by the service. Logged only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub profile_id: Option<String>,
    pub state: String,
    pub message: String,
}

/// Lifecycle state of the client's connection to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    /// Connect requested, waiting for the service to hand back a handle.
    Connecting,
    /// Live handle, permission status unknown or not yet granted.
    ConnectedUnauthorized,
    /// Both permission gates passed.
    ConnectedAuthorized,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::ConnectedUnauthorized => "connected_unauthorized",
            ConnectionState::ConnectedAuthorized => "connected_authorized",
        };
        f.write_str(s)
    }
}

/// What became of a single `act()` call.
///
/// `act()` never returns an error; failures are reported here after they
/// have been logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActOutcome {
    /// The command reached the service.
    Executed,
    /// Parked in the pending slot until the operator answers a permission
    /// prompt. A later `act()` may replace it.
    AwaitingPermission,
    /// A newer `act()` took this call's place before it could run.
    Superseded,
    /// Permission is required but no prompt is available (headless run).
    PermissionUnavailable,
    Failed(ControlError),
}

impl ActOutcome {
    /// Whether the caller should try again on its next tick.
    pub fn should_retry(&self) -> bool {
        matches!(self, ActOutcome::Failed(e) if e.is_transient())
    }
}
