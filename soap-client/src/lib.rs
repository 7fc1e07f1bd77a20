//! SOAP 1.2 codec and transport for ONVIF event subscriptions
//!
//! This crate speaks the small subset of WS-BaseNotification, WS-Addressing and
//! WS-Security that cameras need for push notifications:
//!
//! - [`encode_subscribe`], [`encode_renew`] and [`encode_unsubscribe`] build
//!   requests, signed at send time with a [`UsernameToken`].
//! - [`decode_subscribe_response`] and [`decode_renew_response`] turn replies into
//!   a [`SoapReply`].
//! - [`decode_notify`] flattens an inbound `Notify` delivery.
//! - [`HttpTransport`] POSTs envelopes and refuses non-XML replies.
//!
//! The codec holds no state and performs no I/O; retry and fallback policy is
//! left to the caller.

mod duration;
mod envelope;
mod error;
pub mod notify;
pub mod ns;
mod response;
mod transport;
mod xml;

pub use duration::to_iso8601;
pub use envelope::{
    encode_renew, encode_subscribe, encode_unsubscribe, Credentials, SoapRequest, UsernameToken,
};
pub use error::SoapError;
pub use notify::{decode_notify, NotificationMessage, Notify, SimpleItem};
pub use response::{
    decode_fault, decode_renew_response, decode_subscribe_response, parse_datetime,
    trim_manager_url, Fault, SoapReply, SubscriptionResult,
};
pub use transport::{HttpTransport, SoapResponse, SoapTransport};

/// Path of the event service on every ONVIF device
pub const EVENT_SERVICE_PATH: &str = "/onvif/event_service";

/// Path prefix of the notification endpoints cameras hand out, indexed from 0
pub const NOTIFICATION_PATH_PREFIX: &str = "/onvif/Notification?Idx=00_";
