//! The [`PushManager`] facade and its builder.

use std::sync::Arc;

use callback_server::CallbackServer;
use soap_client::{HttpTransport, SoapTransport};
use tracing::{info, warn};

use crate::config::PushConfig;
use crate::dispatcher::{ListenerHandle, ListenerRegistry, NotificationDispatcher};
use crate::error::{PushError, Result};
use crate::event::PushUpdate;
use crate::host::{DeviceDirectory, NotificationSink, WebhookService};
use crate::lifecycle::{LifecycleParts, LifecycleState, SubscriptionLifecycle};
use crate::scheduler::{ArmedRenewal, RenewalScheduler, RenewalWorker};
use crate::store::{JsonFileStorage, NoStorage, Storage, SubscriptionStore};
use crate::types::{DeviceId, Subscription};
use crate::webhook::CallbackWebhooks;

/// Port range tried when the builder has to start its own callback server
pub const DEFAULT_CALLBACK_PORTS: (u16, u16) = (3400, 3500);

enum WebhookSource {
    Service(Arc<dyn WebhookService>),
    Server(CallbackServer),
}

/// Builder for [`PushManager`]
pub struct PushManagerBuilder {
    devices: Arc<dyn DeviceDirectory>,
    config: PushConfig,
    transport: Option<Arc<dyn SoapTransport>>,
    storage: Option<Arc<dyn Storage>>,
    webhooks: Option<WebhookSource>,
}

impl PushManagerBuilder {
    pub fn config(mut self, config: PushConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom SOAP transport instead of HTTP.
    pub fn transport(mut self, transport: Arc<dyn SoapTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom storage backend.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Let the host register webhooks. Deliveries must be handed to
    /// [`PushManager::deliver`].
    pub fn webhooks(mut self, webhooks: Arc<dyn WebhookService>) -> Self {
        self.webhooks = Some(WebhookSource::Service(webhooks));
        self
    }

    /// Serve webhooks from an already started callback server.
    pub fn callback_server(mut self, server: CallbackServer) -> Self {
        self.webhooks = Some(WebhookSource::Server(server));
        self
    }

    /// Wire the components and start the renewal worker.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration, when the HTTP client cannot be
    /// built, or when no callback server could be started.
    pub async fn build(self) -> Result<PushManager> {
        self.config.validate()?;
        let config = self.config;

        let transport: Arc<dyn SoapTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::with_timeouts(
                config.connect_timeout,
                config.request_timeout,
            )?),
        };

        let storage: Arc<dyn Storage> = match self.storage {
            Some(storage) => storage,
            None if config.persist_subscriptions => match JsonFileStorage::in_data_dir() {
                Some(storage) => {
                    info!(path = %storage.path().display(), "persisting subscriptions");
                    Arc::new(storage)
                }
                None => {
                    warn!("no data directory available, subscriptions will not be persisted");
                    Arc::new(NoStorage)
                }
            },
            None => Arc::new(NoStorage),
        };

        let registry = Arc::new(ListenerRegistry::new());
        let sink: Arc<dyn NotificationSink> = registry.clone();

        let webhooks: Arc<dyn WebhookService> = match self.webhooks {
            Some(WebhookSource::Service(service)) => service,
            Some(WebhookSource::Server(server)) => Arc::new(CallbackWebhooks::new(server, sink)),
            None => {
                let server = CallbackServer::new(DEFAULT_CALLBACK_PORTS)
                    .await
                    .map_err(|e| PushError::Webhook(e.to_string()))?;
                info!(url = %server.base_url(), "callback server started");
                Arc::new(CallbackWebhooks::new(server, sink))
            }
        };

        let store = Arc::new(SubscriptionStore::new(storage, config.save_delay));
        let (scheduler, fire_rx) =
            RenewalScheduler::new(config.safety_margin, config.minimum_renewal_delay);

        let lifecycle = Arc::new(SubscriptionLifecycle::new(LifecycleParts {
            config,
            transport,
            devices: self.devices,
            webhooks: Arc::clone(&webhooks),
            store,
            scheduler: Arc::clone(&scheduler),
            listeners: Arc::clone(&registry),
        }));

        let dispatcher = NotificationDispatcher::new(registry, Arc::downgrade(&lifecycle));
        let worker = RenewalWorker::start(fire_rx, Arc::downgrade(&lifecycle));

        Ok(PushManager {
            lifecycle,
            dispatcher,
            scheduler,
            webhooks,
            worker: Some(worker),
        })
    }
}

/// ONVIF push-subscription manager.
///
/// Owns the subscription lifecycle of every device that has listeners:
/// the first listener subscribes, a timer renews ahead of lease expiry and the
/// last listener leaving unsubscribes.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use onvif_push::{Credentials, DeviceId, OnvifEndpoint, PushManager, PushUpdate, StaticDevices};
///
/// # async fn run() -> onvif_push::Result<()> {
/// let devices = Arc::new(StaticDevices::new());
/// let camera = DeviceId::new("front-door");
/// devices.insert(
///     camera.clone(),
///     OnvifEndpoint::new("http://192.168.1.20:8000", Credentials::new("admin", "secret")),
/// );
///
/// let manager = PushManager::builder(devices).build().await?;
/// let handle = manager
///     .register(&camera, |update: &PushUpdate| println!("{update:?}"))
///     .await;
///
/// // ... later
/// handle.unregister().await;
/// manager.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct PushManager {
    lifecycle: Arc<SubscriptionLifecycle>,
    dispatcher: NotificationDispatcher,
    scheduler: Arc<RenewalScheduler>,
    webhooks: Arc<dyn WebhookService>,
    worker: Option<RenewalWorker>,
}

impl PushManager {
    pub fn builder(devices: Arc<dyn DeviceDirectory>) -> PushManagerBuilder {
        PushManagerBuilder {
            devices,
            config: PushConfig::default(),
            transport: None,
            storage: None,
            webhooks: None,
        }
    }

    /// Register a listener for a device. The first listener subscribes, as does
    /// any listener arriving after a failed attempt.
    pub async fn register<F>(&self, device: &DeviceId, listener: F) -> ListenerHandle
    where
        F: Fn(&PushUpdate) + Send + Sync + 'static,
    {
        self.dispatcher.register(device, Arc::new(listener)).await
    }

    /// Hand a webhook body to the device's listeners and get the HTTP status
    /// to answer with.
    pub fn deliver(&self, device: &DeviceId, body: &[u8]) -> u16 {
        self.dispatcher.deliver(device, body)
    }

    pub async fn ensure_subscribed(&self, device: &DeviceId) {
        self.lifecycle.ensure_subscribed(device).await;
    }

    pub async fn subscribe(&self, device: &DeviceId) {
        self.lifecycle.subscribe(device).await;
    }

    pub async fn renew(&self, device: &DeviceId) {
        self.lifecycle.renew(device).await;
    }

    pub async fn unsubscribe(&self, device: &DeviceId) {
        self.lifecycle.unsubscribe(device).await;
    }

    pub async fn flush_subscriptions(&self, device: &DeviceId, count: usize) {
        self.lifecycle.flush_subscriptions(device, count).await;
    }

    pub fn lifecycle_state(&self, device: &DeviceId) -> LifecycleState {
        self.lifecycle.state(device)
    }

    pub async fn subscription(&self, device: &DeviceId) -> Option<Subscription> {
        self.lifecycle.subscription(device).await
    }

    /// The renewal the timer is currently armed for.
    pub fn armed_renewal(&self) -> Option<ArmedRenewal> {
        self.scheduler.armed()
    }

    pub fn is_tracked(&self, device: &DeviceId) -> bool {
        self.scheduler.tracked(device)
    }

    /// Devices whose subscription is tracked for renewal.
    pub fn tracked_devices(&self) -> Vec<DeviceId> {
        self.scheduler.tracked_devices()
    }

    pub fn listener_count(&self, device: &DeviceId) -> usize {
        self.dispatcher.registry().listener_count(device)
    }

    /// Stop renewals, unsubscribe every device, persist the store and close
    /// the webhook service.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Shutdown`] if the renewal worker did not stop
    /// cleanly. The remaining steps still run.
    pub async fn shutdown(mut self) -> Result<()> {
        let worker_result = match self.worker.take() {
            Some(worker) => worker.shutdown().await,
            None => Ok(()),
        };

        self.lifecycle.shutdown().await;
        self.webhooks.close().await;
        info!("push manager shut down");

        worker_result
    }
}
