//! Wire format for the VPN control-service RPC: one JSON frame per line.

pub mod frames;
pub mod methods;
pub mod payloads;
