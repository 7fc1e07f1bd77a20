//! Outbound SOAP 1.2 envelopes for Subscribe, Renew and Unsubscribe.
//!
//! Requests are built in two steps. The `encode_*` functions produce a
//! [`SoapRequest`] holding the action, the WS-Addressing header elements and the
//! body. [`SoapRequest::envelope`] then wraps it together with a fresh
//! WS-Security [`UsernameToken`], since the token embeds a timestamp and must be
//! regenerated for every attempt.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use sha1::{Digest, Sha1};

use crate::duration::to_iso8601;
use crate::ns;

/// Username and password used to sign requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// A WS-Security UsernameToken with a SHA-1 password digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsernameToken {
    pub username: String,
    /// base64(SHA-1(nonce ++ created ++ password))
    pub password_digest: String,
    /// base64 of the raw nonce bytes
    pub nonce: String,
    pub created: String,
}

impl UsernameToken {
    /// Create a token with a random 16-byte nonce, stamped with the current UTC time.
    pub fn new(credentials: &Credentials) -> Self {
        let nonce = uuid::Uuid::new_v4().into_bytes();
        Self::with_nonce(credentials, &nonce, Utc::now())
    }

    /// Create a token from an explicit nonce and creation time.
    pub fn with_nonce(credentials: &Credentials, nonce: &[u8], created: DateTime<Utc>) -> Self {
        let created = created.format("%Y-%m-%dT%H:%M:%S.000Z").to_string();

        let mut hasher = Sha1::new();
        hasher.update(nonce);
        hasher.update(created.as_bytes());
        hasher.update(credentials.password.as_bytes());

        Self {
            username: credentials.username.clone(),
            password_digest: STANDARD.encode(hasher.finalize()),
            nonce: STANDARD.encode(nonce),
            created,
        }
    }

    fn to_xml(&self) -> String {
        format!(
            r#"<wsse:Security xmlns:wsse="{wsse}" xmlns:wsu="{wsu}" env:mustUnderstand="true"><wsse:UsernameToken><wsse:Username>{username}</wsse:Username><wsse:Password Type="{digest_type}">{digest}</wsse:Password><wsse:Nonce>{nonce}</wsse:Nonce><wsu:Created>{created}</wsu:Created></wsse:UsernameToken></wsse:Security>"#,
            wsse = ns::WSSE,
            wsu = ns::WSU,
            username = escape(&self.username),
            digest_type = ns::PASSWORD_DIGEST,
            digest = self.password_digest,
            nonce = self.nonce,
            created = self.created,
        )
    }
}

/// An encoded request, ready to be wrapped with a security header and sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapRequest {
    /// Action URI, sent both as the `action` HTTP header and, for
    /// Renew/Unsubscribe, in the WS-Addressing header
    pub action: &'static str,
    /// Rendered SOAP header elements that follow the security header
    pub headers: Vec<String>,
    /// Rendered body element
    pub body: String,
}

impl SoapRequest {
    /// HTTP headers to send alongside the envelope.
    pub fn http_headers(&self) -> [(&'static str, &'static str); 2] {
        [("content-type", ns::SOAP_CONTENT_TYPE), ("action", self.action)]
    }

    /// Render the full envelope, signed with `token`.
    pub fn envelope(&self, token: &UsernameToken) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><env:Envelope xmlns:env="{env}" xmlns:wsnt="{wsnt}" xmlns:wsa="{wsa}"><env:Header>{security}{headers}</env:Header><env:Body>{body}</env:Body></env:Envelope>"#,
            env = ns::SOAP_ENV,
            wsnt = ns::WSNT,
            wsa = ns::WSA,
            security = token.to_xml(),
            headers = self.headers.concat(),
            body = self.body,
        )
    }
}

/// Encode a Subscribe request. `lease = None` asks for a subscription that never expires.
pub fn encode_subscribe(callback_url: &str, lease: Option<Duration>) -> SoapRequest {
    let termination = lease
        .map(|lease| {
            format!(
                "<wsnt:InitialTerminationTime>{}</wsnt:InitialTerminationTime>",
                to_iso8601(lease)
            )
        })
        .unwrap_or_default();

    SoapRequest {
        action: ns::SUBSCRIBE_ACTION,
        headers: Vec::new(),
        body: format!(
            "<wsnt:Subscribe><wsnt:ConsumerReference><wsa:Address>{}</wsa:Address></wsnt:ConsumerReference>{}</wsnt:Subscribe>",
            escape(callback_url),
            termination,
        ),
    }
}

/// Encode a Renew request addressed to `manager_url`.
pub fn encode_renew(manager_url: &str, lease: Option<Duration>) -> SoapRequest {
    let termination = lease
        .map(|lease| format!("<wsnt:TerminationTime>{}</wsnt:TerminationTime>", to_iso8601(lease)))
        .unwrap_or_default();

    SoapRequest {
        action: ns::RENEW_ACTION,
        headers: addressing_headers(ns::RENEW_ACTION, manager_url),
        body: format!("<wsnt:Renew>{termination}</wsnt:Renew>"),
    }
}

/// Encode an Unsubscribe request addressed to `manager_url`.
pub fn encode_unsubscribe(manager_url: &str) -> SoapRequest {
    SoapRequest {
        action: ns::UNSUBSCRIBE_ACTION,
        headers: addressing_headers(ns::UNSUBSCRIBE_ACTION, manager_url),
        body: "<wsnt:Unsubscribe/>".to_string(),
    }
}

fn addressing_headers(action: &str, to: &str) -> Vec<String> {
    vec![
        format!("<wsa:Action>{action}</wsa:Action>"),
        format!("<wsa:To>{}</wsa:To>", escape(to)),
    ]
}
