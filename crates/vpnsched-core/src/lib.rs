//! `vpnsched-core`: configuration, the top-level error type and the
//! diagnostic log buffer shared by every vpnsched crate.

pub mod config;
pub mod error;
pub mod logbuf;

pub use config::VpnschedConfig;
pub use error::{Result, VpnschedError};
pub use logbuf::{LogBuffer, LogBufferLayer};
