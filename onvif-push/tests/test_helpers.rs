//! Test doubles for driving the push manager without a camera.
//!
//! - `MockCamera`: a scripted `SoapTransport` that records every request
//! - `RecordingWebhooks`: a `WebhookService` that hands out fixed URLs
//! - reply builders for SubscribeResponse, RenewResponse and faults

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use onvif_push::{
    Credentials, DeviceId, OnvifEndpoint, PushConfig, PushManager, PushUpdate, Result, SoapError,
    SoapResponse, SoapTransport, StaticDevices, Storage, WebhookService,
};
use parking_lot::Mutex;
use soap_client::ns;
use xmltree::Element;

pub const CAMERA_BASE: &str = "http://192.168.1.10:8000";
pub const EVENT_SERVICE: &str = "http://192.168.1.10:8000/onvif/event_service";
/// Callback URL `RecordingWebhooks` hands out for `camera_id()`
pub const HOOK_URL: &str = "http://host.test/hook/front-door";

/// A request the camera received
#[derive(Debug, Clone)]
pub struct Recorded {
    pub url: String,
    pub action: String,
    pub envelope: String,
}

impl Recorded {
    pub fn is_subscribe(&self) -> bool {
        self.action == ns::SUBSCRIBE_ACTION
    }

    pub fn is_renew(&self) -> bool {
        self.action == ns::RENEW_ACTION
    }

    pub fn is_unsubscribe(&self) -> bool {
        self.action == ns::UNSUBSCRIBE_ACTION
    }

    /// Whether the WS-Addressing `To` header targets `url`.
    pub fn addressed_to(&self, url: &str) -> bool {
        self.envelope.contains(&format!("<wsa:To>{url}</wsa:To>"))
    }
}

/// Scripted reply for one request
#[derive(Debug, Clone)]
pub enum Reply {
    Xml(u16, String),
    NoAnswer,
}

/// Scripted camera. Requests without a scripted reply get a successful answer.
#[derive(Default)]
pub struct MockCamera {
    requests: Mutex<Vec<Recorded>>,
    scripted: Mutex<HashMap<&'static str, VecDeque<Reply>>>,
    next_index: Mutex<usize>,
    lease: Mutex<Option<Duration>>,
    /// How far the camera's clock runs ahead of the host's
    skew: Mutex<Duration>,
}

impl MockCamera {
    pub fn new() -> Arc<Self> {
        let camera = Self::default();
        *camera.lease.lock() = Some(Duration::from_secs(3600));
        Arc::new(camera)
    }

    /// Lease granted by default replies, `None` for subscriptions that never expire.
    pub fn set_lease(&self, lease: Option<Duration>) {
        *self.lease.lock() = lease;
    }

    /// Move the camera's clock forward for every later default reply.
    pub fn advance_clock(&self, by: Duration) {
        *self.skew.lock() += by;
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(*self.skew.lock()).unwrap()
    }

    /// Queue a reply for the next request with `action`.
    pub fn script(&self, action: &'static str, reply: Reply) {
        self.scripted.lock().entry(action).or_default().push_back(reply);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn count(&self, action: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.action == action).count()
    }

    pub fn clear(&self) {
        self.requests.lock().clear();
    }

    fn default_reply(&self, action: &str) -> Reply {
        let lease = *self.lease.lock();
        if action == ns::SUBSCRIBE_ACTION {
            let mut next = self.next_index.lock();
            let index = *next;
            *next += 1;
            Reply::Xml(200, subscribe_response(index, self.now(), lease))
        } else if action == ns::RENEW_ACTION {
            Reply::Xml(200, renew_response(self.now(), lease))
        } else {
            Reply::Xml(200, unsubscribe_response())
        }
    }
}

#[async_trait]
impl SoapTransport for MockCamera {
    async fn send(&self, url: &str, action: &str, envelope: String) -> std::result::Result<SoapResponse, SoapError> {
        self.requests.lock().push(Recorded {
            url: url.to_string(),
            action: action.to_string(),
            envelope,
        });

        let scripted = self
            .scripted
            .lock()
            .get_mut(action)
            .and_then(VecDeque::pop_front);
        match scripted.unwrap_or_else(|| self.default_reply(action)) {
            Reply::Xml(status, body) => Ok(SoapResponse {
                status,
                document: Element::parse(body.as_bytes()).expect("scripted reply must be xml"),
            }),
            Reply::NoAnswer => Err(SoapError::Network("connection refused".to_string())),
        }
    }
}

/// Webhook service handing out `http://host.test/hook/{device}`
#[derive(Default)]
pub struct RecordingWebhooks {
    pub registered: Mutex<Vec<DeviceId>>,
    pub unregistered: Mutex<Vec<DeviceId>>,
    pub fail: Mutex<bool>,
}

impl RecordingWebhooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl WebhookService for RecordingWebhooks {
    async fn register(&self, device: &DeviceId) -> Result<String> {
        if *self.fail.lock() {
            return Err(onvif_push::PushError::Webhook("host refused".to_string()));
        }
        self.registered.lock().push(device.clone());
        Ok(format!("http://host.test/hook/{device}"))
    }

    async fn unregister(&self, device: &DeviceId) {
        self.unregistered.lock().push(device.clone());
    }
}

/// Collects updates delivered to a listener
#[derive(Clone, Default)]
pub struct Updates(Arc<Mutex<Vec<PushUpdate>>>);

impl Updates {
    pub fn listener(&self) -> impl Fn(&PushUpdate) + Send + Sync + 'static {
        let updates = Arc::clone(&self.0);
        move |update: &PushUpdate| updates.lock().push(update.clone())
    }

    pub fn all(&self) -> Vec<PushUpdate> {
        self.0.lock().clone()
    }

    pub fn last(&self) -> Option<PushUpdate> {
        self.0.lock().last().cloned()
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn subscribe_response(index: usize, now: DateTime<Utc>, lease: Option<Duration>) -> String {
    let termination = lease
        .map(|lease| {
            let end = now + chrono::Duration::from_std(lease).unwrap();
            format!("<wsnt:TerminationTime>{}</wsnt:TerminationTime>", timestamp(end))
        })
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:wsnt="http://docs.oasis-open.org/wsn/b-2" xmlns:wsa="http://www.w3.org/2005/08/addressing">
  <env:Body>
    <wsnt:SubscribeResponse>
      <wsnt:SubscriptionReference>
        <wsa:Address>{CAMERA_BASE}/onvif/Subscription?Idx=00_{index}</wsa:Address>
      </wsnt:SubscriptionReference>
      <wsnt:CurrentTime>{}</wsnt:CurrentTime>
      {termination}
    </wsnt:SubscribeResponse>
  </env:Body>
</env:Envelope>"#,
        timestamp(now)
    )
}

pub fn renew_response(now: DateTime<Utc>, lease: Option<Duration>) -> String {
    let termination = lease
        .map(|lease| {
            let end = now + chrono::Duration::from_std(lease).unwrap();
            format!("<wsnt:TerminationTime>{}</wsnt:TerminationTime>", timestamp(end))
        })
        .unwrap_or_default();
    format!(
        r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:wsnt="http://docs.oasis-open.org/wsn/b-2">
  <env:Body>
    <wsnt:RenewResponse>
      {termination}
      <wsnt:CurrentTime>{}</wsnt:CurrentTime>
    </wsnt:RenewResponse>
  </env:Body>
</env:Envelope>"#,
        timestamp(now)
    )
}

pub fn unsubscribe_response() -> String {
    r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:wsnt="http://docs.oasis-open.org/wsn/b-2"><env:Body><wsnt:UnsubscribeResponse/></env:Body></env:Envelope>"#
        .to_string()
}

pub fn fault_response(code: &str, reason: &str) -> String {
    format!(
        r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">
  <env:Body>
    <env:Fault>
      <env:Code><env:Value>{code}</env:Value></env:Code>
      <env:Reason><env:Text xml:lang="en">{reason}</env:Text></env:Reason>
    </env:Fault>
  </env:Body>
</env:Envelope>"#
    )
}

pub fn camera_id() -> DeviceId {
    DeviceId::new("front-door")
}

pub fn endpoint() -> OnvifEndpoint {
    OnvifEndpoint::new(CAMERA_BASE, Credentials::new("admin", "secret"))
}

/// Directory holding the test camera
pub fn devices() -> Arc<StaticDevices> {
    let devices = Arc::new(StaticDevices::new());
    devices.insert(camera_id(), endpoint());
    devices
}

/// Everything a lifecycle test needs
pub struct Harness {
    pub manager: PushManager,
    pub camera: Arc<MockCamera>,
    pub webhooks: Arc<RecordingWebhooks>,
    pub devices: Arc<StaticDevices>,
}

pub async fn harness(storage: Arc<dyn Storage>) -> Harness {
    harness_with(storage, PushConfig::default(), devices()).await
}

pub async fn harness_with(
    storage: Arc<dyn Storage>,
    config: PushConfig,
    devices: Arc<StaticDevices>,
) -> Harness {
    let camera = MockCamera::new();
    let webhooks = RecordingWebhooks::new();
    let manager = PushManager::builder(devices.clone())
        .config(config)
        .transport(camera.clone())
        .storage(storage)
        .webhooks(webhooks.clone())
        .build()
        .await
        .expect("manager builds");

    Harness {
        manager,
        camera,
        webhooks,
        devices,
    }
}

/// Let spawned tasks run. Under a paused clock this also advances time a little.
pub async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}
