//! HTTP transport for SOAP requests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};
use xmltree::Element;

use crate::error::SoapError;
use crate::ns;

/// Status code and parsed document of a camera reply
#[derive(Debug, Clone)]
pub struct SoapResponse {
    pub status: u16,
    pub document: Element,
}

/// Sends a rendered envelope and returns the parsed reply.
///
/// Implementations never retry. A connection-level failure is reported as
/// [`SoapError::Network`] so callers can tell "no answer" apart from an
/// application-level error status.
#[async_trait]
pub trait SoapTransport: Send + Sync {
    async fn send(&self, url: &str, action: &str, envelope: String) -> Result<SoapResponse, SoapError>;
}

/// [`SoapTransport`] over `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a 5s connect timeout and a 10s request timeout
    pub fn new() -> Result<Self, SoapError> {
        Self::with_timeouts(Duration::from_secs(5), Duration::from_secs(10))
    }

    pub fn with_timeouts(connect: Duration, request: Duration) -> Result<Self, SoapError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect)
            .timeout(request)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SoapError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SoapTransport for HttpTransport {
    async fn send(&self, url: &str, action: &str, envelope: String) -> Result<SoapResponse, SoapError> {
        debug!(%url, %action, "sending soap request");

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, ns::SOAP_CONTENT_TYPE)
            .header("action", action)
            .body(envelope)
            .send()
            .await
            .map_err(|e| SoapError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !content_type.contains("xml") {
            warn!(%url, status, %content_type, "camera replied with a non-xml response");
            return Err(SoapError::UnexpectedContentType(content_type));
        }

        let text = response
            .text()
            .await
            .map_err(|e| SoapError::Network(e.to_string()))?;
        debug!(%url, status, body = %text, "soap response");

        let document = Element::parse(text.as_bytes()).map_err(|e| SoapError::Parse(e.to_string()))?;
        Ok(SoapResponse { status, document })
    }
}
