// Method and event names understood by the VPN control service.

// permission gates
pub const PERMISSION_PREPARE_API: &str = "permission.prepare_api";
pub const PERMISSION_PREPARE_VPN: &str = "permission.prepare_vpn";

// profiles
pub const PROFILES_LIST: &str = "profiles.list";
pub const PROFILE_START: &str = "profile.start";
pub const PROFILE_SET_DEFAULT: &str = "profile.set_default";

// tunnel
pub const VPN_DISCONNECT: &str = "vpn.disconnect";

// status push
pub const STATUS_SUBSCRIBE: &str = "status.subscribe";
pub const STATUS_UNSUBSCRIBE: &str = "status.unsubscribe";

// events
pub const EVENT_STATUS: &str = "status";
