//! Error types for the SOAP client

use thiserror::Error;

/// Errors that can occur while talking to a camera's event service
#[derive(Debug, Error)]
pub enum SoapError {
    /// The camera never answered (connection refused, reset or timed out)
    #[error("Network/HTTP error: {0}")]
    Network(String),

    /// The camera answered with something other than XML
    #[error("Unexpected content type: {0}")]
    UnexpectedContentType(String),

    /// XML parsing error
    #[error("XML parsing error: {0}")]
    Parse(String),

    /// A URL could not be built or understood
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl SoapError {
    /// Whether this error means the camera gave no usable answer at the transport level.
    pub fn is_no_answer(&self) -> bool {
        matches!(self, SoapError::Network(_) | SoapError::InvalidUrl(_))
    }
}
