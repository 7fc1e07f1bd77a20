//! [`WebhookService`] backed by the bundled callback server.

use std::sync::Arc;

use async_trait::async_trait;
use callback_server::{CallbackServer, EventRouter, NotificationHandler, NotificationPayload, WEBHOOK_PATH};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::host::{NotificationSink, WebhookService};
use crate::types::DeviceId;

/// Hands one device's deliveries to the sink
struct DeviceHook {
    device: DeviceId,
    sink: Arc<dyn NotificationSink>,
}

#[async_trait]
impl NotificationHandler for DeviceHook {
    async fn handle(&self, payload: NotificationPayload) -> u16 {
        self.sink.deliver(&self.device, &payload.body)
    }
}

/// One webhook per device on a [`CallbackServer`].
///
/// Webhook ids are derived from the device id, so a device keeps its callback
/// URL across restarts as long as the server binds the same address.
pub struct CallbackWebhooks {
    router: Arc<EventRouter>,
    base_url: String,
    server: Mutex<Option<CallbackServer>>,
    ids: DashMap<DeviceId, String>,
    sink: Arc<dyn NotificationSink>,
}

impl CallbackWebhooks {
    pub fn new(server: CallbackServer, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            router: Arc::clone(server.router()),
            base_url: server.base_url().to_string(),
            server: Mutex::new(Some(server)),
            ids: DashMap::new(),
            sink,
        }
    }

    fn url(&self, webhook_id: &str) -> String {
        format!("{}{}/{}", self.base_url, WEBHOOK_PATH, webhook_id)
    }

    /// Callback URL currently registered for a device.
    pub fn webhook_url(&self, device: &DeviceId) -> Option<String> {
        self.ids.get(device).map(|id| self.url(&id))
    }
}

#[async_trait]
impl WebhookService for CallbackWebhooks {
    async fn register(&self, device: &DeviceId) -> Result<String> {
        if let Some(url) = self.webhook_url(device) {
            return Ok(url);
        }

        let hook = Arc::new(DeviceHook {
            device: device.clone(),
            sink: Arc::clone(&self.sink),
        });
        let webhook_id = self.router.register_keyed(device.as_str(), hook).await;
        debug!(%device, %webhook_id, "webhook registered");

        let url = self.url(&webhook_id);
        self.ids.insert(device.clone(), webhook_id);
        Ok(url)
    }

    async fn unregister(&self, device: &DeviceId) {
        if let Some((_, webhook_id)) = self.ids.remove(device) {
            self.router.unregister(&webhook_id).await;
            debug!(%device, %webhook_id, "webhook removed");
        }
    }

    async fn close(&self) {
        if let Some(server) = self.server.lock().await.take() {
            server.shutdown().await;
        }
    }
}
