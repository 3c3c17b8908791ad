use serde::{Deserialize, Serialize};

/// Entry in the `profiles.list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePayload {
    pub id: String,
    pub name: String,
}

/// Response to the `permission.prepare_*` methods.
///
/// `token` is absent when permission is already granted; otherwise it is the
/// opaque request to hand to the operator's permission prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Params for `profile.start` and `profile.set_default`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileIdParams {
    pub id: String,
}

/// Payload of the `status` push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub profile_id: Option<String>,
    pub state: String,
    #[serde(default)]
    pub message: String,
}
