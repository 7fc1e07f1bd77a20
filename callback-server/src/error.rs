//! Error types for the callback server

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("No available port found in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },

    #[error("Failed to detect local IP address")]
    LocalIpUnavailable,

    #[error("Failed to start server: {0}")]
    Start(String),
}
