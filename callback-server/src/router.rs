//! Webhook routing for inbound HTTP callbacks.
//!
//! This module provides the `EventRouter` which maps webhook ids to the
//! handlers that consume their deliveries.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

/// An unparsed webhook delivery.
///
/// Carries only the webhook id and the raw request, with no knowledge of what
/// the body means.
#[derive(Debug, Clone)]
pub struct NotificationPayload {
    /// The webhook id taken from the request path
    pub webhook_id: String,
    /// The request's `content-type` header, if any
    pub content_type: Option<String>,
    /// The raw request body
    pub body: Bytes,
}

/// Consumes deliveries for one webhook and decides the HTTP status of the reply.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, payload: NotificationPayload) -> u16;
}

/// Webhook id derived from a stable key such as a device id.
///
/// The same key yields the same id in every process, so a callback URL handed
/// out before a restart stays routable after it.
pub fn webhook_id_for(key: &str) -> String {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, key.as_bytes())
        .simple()
        .to_string()
}

/// Routes webhook deliveries to registered handlers.
///
/// When a request arrives the router looks up the handler registered for the
/// webhook id. Deliveries for unknown ids are dropped.
#[derive(Clone, Default)]
pub struct EventRouter {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn NotificationHandler>>>>,
}

impl EventRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a freshly generated webhook id.
    ///
    /// # Returns
    ///
    /// The new webhook id, suitable for building the callback URL.
    pub async fn register_new(&self, handler: Arc<dyn NotificationHandler>) -> String {
        let webhook_id = uuid::Uuid::new_v4().simple().to_string();
        self.register(webhook_id.clone(), handler).await;
        webhook_id
    }

    /// Register a handler under the id [`webhook_id_for`] derives from `key`,
    /// replacing any previous one.
    pub async fn register_keyed(&self, key: &str, handler: Arc<dyn NotificationHandler>) -> String {
        let webhook_id = webhook_id_for(key);
        self.register(webhook_id.clone(), handler).await;
        webhook_id
    }

    /// Register a handler for a webhook id, replacing any previous one.
    ///
    /// # Arguments
    ///
    /// * `webhook_id` - The id that appears in the callback path
    /// * `handler` - Receives every delivery for this id
    pub async fn register(&self, webhook_id: String, handler: Arc<dyn NotificationHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.insert(webhook_id, handler);
    }

    /// Unregister a webhook id.
    ///
    /// Returns `true` if the id was registered.
    pub async fn unregister(&self, webhook_id: &str) -> bool {
        let mut handlers = self.handlers.write().await;
        handlers.remove(webhook_id).is_some()
    }

    pub async fn is_registered(&self, webhook_id: &str) -> bool {
        self.handlers.read().await.contains_key(webhook_id)
    }

    /// Route a delivery to its handler.
    ///
    /// # Returns
    ///
    /// The status chosen by the handler, or `None` if the webhook id is not
    /// registered.
    pub async fn route_event(&self, payload: NotificationPayload) -> Option<u16> {
        // Release the lock before awaiting the handler so it may unregister itself.
        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&payload.webhook_id).cloned()
        }?;
        Some(handler.handle(payload).await)
    }
}
