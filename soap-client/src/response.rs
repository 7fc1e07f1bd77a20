//! Decoding of SubscribeResponse, RenewResponse and SOAP faults.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use url::Url;
use xmltree::Element;

use crate::ns;
use crate::xml::{child, descendant, text};

/// A subscription confirmed by the camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResult {
    /// Manager reference with scheme and host stripped, e.g. `/onvif/Subscription?Idx=00_1`
    pub manager_url: String,
    /// `CurrentTime` as reported by the camera's clock
    pub current_time: DateTime<Utc>,
    /// `TerminationTime - CurrentTime`, `None` when the camera granted no expiry
    pub lease: Option<Duration>,
}

/// A SOAP fault reported by the camera
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fault {
    pub code: Option<String>,
    pub reason: Option<String>,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.code.as_deref().unwrap_or("unknown"),
            self.reason.as_deref().unwrap_or("no reason given")
        )
    }
}

/// Outcome of decoding a Subscribe or Renew reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoapReply {
    Subscription(SubscriptionResult),
    Fault(Fault),
    /// XML that is neither a usable response nor a fault
    Unrecognized,
}

/// Decode the reply to a Subscribe request.
pub fn decode_subscribe_response(status: u16, document: &Element) -> SoapReply {
    decode(status, document, "SubscribeResponse", None)
}

/// Decode the reply to a Renew request.
///
/// RenewResponse does not repeat the subscription reference, so the fragment
/// that was renewed is passed in as `reference`.
pub fn decode_renew_response(status: u16, document: &Element, reference: &str) -> SoapReply {
    decode(status, document, "RenewResponse", Some(reference))
}

/// Extract `Fault/Code/Value` and `Fault/Reason/Text`.
pub fn decode_fault(document: &Element) -> Fault {
    let Some(fault) = find_fault(document) else {
        return Fault::default();
    };
    Fault {
        code: text(child(fault, ns::SOAP_ENV, "Code").and_then(|c| child(c, ns::SOAP_ENV, "Value"))),
        reason: text(
            child(fault, ns::SOAP_ENV, "Reason").and_then(|r| child(r, ns::SOAP_ENV, "Text")),
        ),
    }
}

/// Strip `scheme://authority` from a manager reference, keeping path and query.
///
/// References that are already a path are returned unchanged. A bare
/// `http://host:port` names no subscription resource and yields `None`.
pub fn trim_manager_url(reference: &str) -> Option<String> {
    if reference.starts_with('/') {
        return Some(reference.to_string());
    }
    let url = Url::parse(reference).ok()?;
    if !url.has_host() {
        return None;
    }
    match url.query() {
        Some(query) => Some(format!("{}?{}", url.path(), query)),
        None if url.path() == "/" => None,
        None => Some(url.path().to_string()),
    }
}

fn find_fault(document: &Element) -> Option<&Element> {
    if document.name == "Fault" && document.namespace.as_deref() == Some(ns::SOAP_ENV) {
        return Some(document);
    }
    descendant(document, ns::SOAP_ENV, "Fault")
}

fn decode(status: u16, document: &Element, response_name: &str, reference: Option<&str>) -> SoapReply {
    if status != 200 {
        return SoapReply::Fault(decode_fault(document));
    }

    let Some(response) = descendant(document, ns::WSNT, response_name) else {
        if find_fault(document).is_some() {
            return SoapReply::Fault(decode_fault(document));
        }
        return SoapReply::Unrecognized;
    };

    let reference = match reference {
        Some(reference) => Some(reference.to_string()),
        None => text(
            child(response, ns::WSNT, "SubscriptionReference")
                .and_then(|r| child(r, ns::WSA, "Address")),
        ),
    };
    let current = text(child(response, ns::WSNT, "CurrentTime"));
    let termination = text(child(response, ns::WSNT, "TerminationTime"));

    let (Some(reference), Some(current)) = (reference, current) else {
        return SoapReply::Unrecognized;
    };
    let Some(manager_url) = trim_manager_url(&reference) else {
        return SoapReply::Unrecognized;
    };
    let Some(current_time) = parse_datetime(&current) else {
        return SoapReply::Unrecognized;
    };

    let lease = match termination {
        None => None,
        Some(termination) => {
            let Some(termination) = parse_datetime(&termination) else {
                return SoapReply::Unrecognized;
            };
            // A lease that is already over cannot be tracked.
            match (termination - current_time).to_std() {
                Ok(lease) if !lease.is_zero() => Some(lease),
                _ => return SoapReply::Unrecognized,
            }
        }
    };

    SoapReply::Subscription(SubscriptionResult {
        manager_url,
        current_time,
        lease,
    })
}

/// Parse an xsd:dateTime. Values without an offset are taken as UTC.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}
