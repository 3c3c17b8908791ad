use thiserror::Error;

#[derive(Debug, Error)]
pub enum VpnschedError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VpnschedError {
    /// Short error code string used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            VpnschedError::Config(_) => "CONFIG_ERROR",
            VpnschedError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, VpnschedError>;
