//! `vpnsched-control`: drives the external VPN control service.
//!
//! [`VpnControlClient`] owns the connection lifecycle: it connects on demand,
//! walks the two permission gates (API access, then VPN operation), parks at
//! most one action while the operator answers a prompt, and dispatches
//! schedule commands by profile name.
//!
//! The service itself sits behind [`ControlService`]; [`rpc`] provides the
//! TCP adapter and `fake` (behind the `fake` feature) an in-memory one for
//! tests.

pub mod client;
pub mod error;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod rpc;
pub mod service;
pub mod types;

pub use client::{ServiceLink, VpnControlClient};
pub use error::ControlError;
pub use rpc::RpcConnector;
pub use service::{ControlService, PermissionPrompt, ServiceConnector};
pub use types::{
    ActOutcome, ConnectionState, PermissionGate, PermissionRequest, StatusUpdate, VpnProfile,
};
