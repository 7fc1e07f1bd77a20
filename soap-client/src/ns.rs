//! Namespace URIs and action URIs used on the wire.

pub const SOAP_ENV: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const WSNT: &str = "http://docs.oasis-open.org/wsn/b-2";
pub const WSA: &str = "http://www.w3.org/2005/08/addressing";
pub const WSSE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSU: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
pub const TT: &str = "http://www.onvif.org/ver10/schema";

pub const PASSWORD_DIGEST: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";

/// Topic dialect every notification we act on must carry
pub const CONCRETE_SET_DIALECT: &str =
    "http://www.onvif.org/ver10/tev/topicExpression/ConcreteSet";

pub const SUBSCRIBE_ACTION: &str =
    "http://docs.oasis-open.org/wsn/bw-2/NotificationProducer/SubscribeRequest";
pub const RENEW_ACTION: &str =
    "http://docs.oasis-open.org/wsn/bw-2/SubscriptionManager/RenewRequest";
pub const UNSUBSCRIBE_ACTION: &str =
    "http://docs.oasis-open.org/wsn/bw-2/SubscriptionManager/UnsubscribeRequest";

/// Content type for every request we POST
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";
