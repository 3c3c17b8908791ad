use thiserror::Error;

/// Errors that can occur while driving the VPN control service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// Binding to the service failed, timed out, or the service went away.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// No profile with this exact name is known to the service.
    #[error("Profile not found: {name}")]
    ProfileNotFound { name: String },

    /// The service rejected or failed a call.
    #[error("Remote call {method} failed: {reason}")]
    Remote { method: String, reason: String },

    /// The action cannot be dispatched as given.
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// The client actor has shut down.
    #[error("Control client stopped")]
    Stopped,
}

impl ControlError {
    pub(crate) fn remote(method: &str, reason: impl Into<String>) -> Self {
        ControlError::Remote {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether re-attempting on a later tick may succeed.
    ///
    /// Lookup misses and rejected calls are deterministic for the same
    /// schedule and service state, so only connection problems count.
    pub fn is_transient(&self) -> bool {
        matches!(self, ControlError::Connection(_) | ControlError::Stopped)
    }
}
