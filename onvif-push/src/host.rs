//! Seams to the host application.
//!
//! The manager never talks to the camera's own API or the host's HTTP stack
//! directly. It asks a [`DeviceDirectory`] where a camera's ONVIF service lives
//! and a [`WebhookService`] for a callback URL. Webhook deliveries come back
//! in through a [`NotificationSink`].

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use soap_client::{Credentials, EVENT_SERVICE_PATH};
use url::Url;

use crate::error::Result;
use crate::types::DeviceId;

/// Where and how to reach a camera's ONVIF event service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnvifEndpoint {
    /// `http://host:port`, without a trailing slash
    pub base_url: String,
    pub credentials: Credentials,
    /// Number of Subscribe calls the device needs, one per notification endpoint
    pub subscription_count: usize,
}

impl OnvifEndpoint {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            subscription_count: 1,
        }
    }

    /// Set how many Subscribe calls the device needs.
    pub fn with_subscription_count(mut self, count: usize) -> Self {
        self.subscription_count = count.max(1);
        self
    }

    /// URL every request is POSTed to.
    pub fn event_service_url(&self) -> String {
        self.resolve(EVENT_SERVICE_PATH)
    }

    /// Absolute URL of a manager path fragment.
    ///
    /// Fragments are host-absolute, so any path on `base_url` is replaced.
    pub fn resolve(&self, fragment: &str) -> String {
        Url::parse(&self.base_url)
            .and_then(|base| base.join(fragment))
            .map(String::from)
            .unwrap_or_else(|_| format!("{}{}", self.base_url, fragment))
    }
}

/// Device data owned by the host.
pub trait DeviceDirectory: Send + Sync {
    /// ONVIF endpoint of a device, `None` when ONVIF is disabled or the device is unknown.
    fn endpoint(&self, device: &DeviceId) -> Option<OnvifEndpoint>;

    /// Host clock minus device clock, when measured.
    fn clock_offset(&self, device: &DeviceId) -> Option<chrono::Duration>;
}

/// Registers per-device HTTP callbacks with the host.
#[async_trait]
pub trait WebhookService: Send + Sync {
    /// Register (or look up) the webhook for a device and return its callback URL.
    async fn register(&self, device: &DeviceId) -> Result<String>;

    /// Remove a device's webhook. Unknown devices are ignored.
    async fn unregister(&self, device: &DeviceId);

    /// Release any resources held by the service.
    async fn close(&self) {}
}

/// Receives raw webhook bodies for a device and answers with an HTTP status.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, device: &DeviceId, body: &[u8]) -> u16;
}

#[derive(Debug, Clone)]
struct DeviceEntry {
    endpoint: Option<OnvifEndpoint>,
    clock_offset: Option<chrono::Duration>,
}

/// In-memory [`DeviceDirectory`] the host keeps up to date.
#[derive(Debug, Default)]
pub struct StaticDevices {
    devices: RwLock<HashMap<DeviceId, DeviceEntry>>,
}

impl StaticDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a device's endpoint, keeping any known clock offset.
    pub fn insert(&self, device: DeviceId, endpoint: OnvifEndpoint) {
        let mut devices = self.devices.write();
        let entry = devices.entry(device).or_insert(DeviceEntry {
            endpoint: None,
            clock_offset: None,
        });
        entry.endpoint = Some(endpoint);
    }

    /// Mark a device's ONVIF service as unavailable.
    pub fn disable(&self, device: &DeviceId) {
        if let Some(entry) = self.devices.write().get_mut(device) {
            entry.endpoint = None;
        }
    }

    pub fn remove(&self, device: &DeviceId) {
        self.devices.write().remove(device);
    }

    pub fn set_clock_offset(&self, device: &DeviceId, offset: Option<chrono::Duration>) {
        if let Some(entry) = self.devices.write().get_mut(device) {
            entry.clock_offset = offset;
        }
    }
}

impl DeviceDirectory for StaticDevices {
    fn endpoint(&self, device: &DeviceId) -> Option<OnvifEndpoint> {
        self.devices.read().get(device)?.endpoint.clone()
    }

    fn clock_offset(&self, device: &DeviceId) -> Option<chrono::Duration> {
        self.devices.read().get(device)?.clock_offset
    }
}
