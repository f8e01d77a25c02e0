//! Bridge Error Types

use thiserror::Error;

/// Errors that can occur while driving the serial-CAN bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Bridge process failed to launch or exited immediately
    #[error("bridge process failed to start: {0}")]
    BridgeStart(String),

    /// An external command returned a failure status
    #[error("command `{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },

    /// An external command did not finish within its deadline
    #[error("command `{0}` timed out after {1}ms")]
    CommandTimeout(String, u64),

    /// Interface status could not be queried or parsed
    #[error("status query failed: {0}")]
    StatusQuery(String),

    /// CAN socket error
    #[error("CAN socket error: {0}")]
    Socket(String),

    /// Manual frame spec failed validation, nothing was transmitted
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Socket(err.to_string())
    }
}
