use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    client::ServiceLink,
    error::ControlError,
    types::{PermissionRequest, VpnProfile},
};

/// Narrow interface to the external VPN control service.
///
/// Implementations must be `Send + Sync` so a connected handle can be held by
/// the client actor and shared with adapter tasks. Every call may fail with
/// [`ControlError::Remote`] (or [`ControlError::Connection`] when the
/// transport is gone).
#[async_trait]
pub trait ControlService: Send + Sync {
    /// Gate 1: `None` when the application may already use the API.
    async fn prepare_api_permission(&self) -> Result<Option<PermissionRequest>, ControlError>;

    /// Gate 2: `None` when the service may already operate a tunnel.
    async fn prepare_vpn_permission(&self) -> Result<Option<PermissionRequest>, ControlError>;

    async fn list_profiles(&self) -> Result<Vec<VpnProfile>, ControlError>;

    async fn start_profile(&self, id: &str) -> Result<(), ControlError>;

    async fn disconnect(&self) -> Result<(), ControlError>;

    async fn set_default_profile(&self, id: &str) -> Result<(), ControlError>;

    /// Start forwarding status notifications to `listener`.
    async fn register_status_listener(&self, listener: ServiceLink) -> Result<(), ControlError>;

    async fn unregister_status_listener(&self) -> Result<(), ControlError>;

    /// Release the underlying connection. Best-effort; the default is a no-op.
    async fn close(&self) {}
}

/// Establishes connections to the control service.
///
/// The `link` lets the adapter report that the service went away
/// ([`ServiceLink::disconnected`]) after `connect` has returned.
#[async_trait]
pub trait ServiceConnector: Send + Sync {
    async fn connect(&self, link: ServiceLink) -> Result<Arc<dyn ControlService>, ControlError>;
}

/// Surfaces a permission request to a human operator.
///
/// Absent in headless runs, in which case commands needing permission are
/// dropped and reported rather than prompted for.
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    /// Returns `true` when the operator granted the permission.
    async fn request(&self, request: PermissionRequest) -> bool;
}
