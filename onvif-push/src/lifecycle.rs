//! Per-device subscription state machine.
//!
//! Every operation on a device runs under that device's async mutex, so at
//! most one Subscribe, Renew or Unsubscribe exchange is in flight per device.
//! Failures never surface as `Err`: they are classified into a
//! [`PushUpdate`] for the device's listeners and the device falls back to
//! `Unsubscribed`.
//!
//! ```text
//! Unsubscribed -> Subscribing -> Subscribed | Unsubscribed
//! Subscribed   -> Renewing    -> Subscribed | Subscribing | Unsubscribed
//! any          -> Unsubscribing -> Unsubscribed
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use soap_client::{
    decode_renew_response, decode_subscribe_response, encode_renew, encode_subscribe,
    encode_unsubscribe, SoapError, SoapReply, SoapRequest, SoapResponse, SoapTransport,
    SubscriptionResult, UsernameToken, NOTIFICATION_PATH_PREFIX,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::PushConfig;
use crate::dispatcher::ListenerRegistry;
use crate::event::{FallbackReason, PushUpdate};
use crate::host::{DeviceDirectory, OnvifEndpoint, WebhookService};
use crate::scheduler::RenewalScheduler;
use crate::store::SubscriptionStore;
use crate::types::{DeviceId, Subscription};

/// Where a device is in its subscription lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unsubscribed,
    Subscribing,
    Subscribed,
    Renewing,
    Unsubscribing,
}

/// Collaborators the lifecycle drives
pub struct LifecycleParts {
    pub config: PushConfig,
    pub transport: Arc<dyn SoapTransport>,
    pub devices: Arc<dyn DeviceDirectory>,
    pub webhooks: Arc<dyn WebhookService>,
    pub store: Arc<SubscriptionStore>,
    pub scheduler: Arc<RenewalScheduler>,
    pub listeners: Arc<ListenerRegistry>,
}

pub struct SubscriptionLifecycle {
    config: PushConfig,
    transport: Arc<dyn SoapTransport>,
    devices: Arc<dyn DeviceDirectory>,
    webhooks: Arc<dyn WebhookService>,
    store: Arc<SubscriptionStore>,
    scheduler: Arc<RenewalScheduler>,
    listeners: Arc<ListenerRegistry>,
    locks: DashMap<DeviceId, Arc<AsyncMutex<()>>>,
    states: DashMap<DeviceId, LifecycleState>,
    /// Devices whose last attempt failed
    degraded: Mutex<HashSet<DeviceId>>,
}

impl SubscriptionLifecycle {
    pub fn new(parts: LifecycleParts) -> Self {
        Self {
            config: parts.config,
            transport: parts.transport,
            devices: parts.devices,
            webhooks: parts.webhooks,
            store: parts.store,
            scheduler: parts.scheduler,
            listeners: parts.listeners,
            locks: DashMap::new(),
            states: DashMap::new(),
            degraded: Mutex::new(HashSet::new()),
        }
    }

    pub fn state(&self, device: &DeviceId) -> LifecycleState {
        self.states
            .get(device)
            .map(|state| *state)
            .unwrap_or(LifecycleState::Unsubscribed)
    }

    /// The stored subscription of a device, if any.
    pub async fn subscription(&self, device: &DeviceId) -> Option<Subscription> {
        self.store.get(device).await
    }

    /// Register the device's webhook, then reuse a valid stored subscription
    /// or subscribe.
    ///
    /// A stored subscription is only reused while the camera still posts to the
    /// webhook's current URL. One pointing elsewhere is cancelled and replaced.
    pub async fn ensure_subscribed(&self, device: &DeviceId) {
        let _guard = self.lock(device).await;
        if self.state(device) == LifecycleState::Unsubscribed {
            self.set_state(device, LifecycleState::Subscribing);
        }

        let Some(callback_url) = self.register_webhook(device).await else {
            return;
        };

        if let Some(existing) = self.store.get(device).await {
            if existing.is_expired(Utc::now()) {
                debug!(%device, "stored subscription expired");
                self.discard(device).await;
            } else if existing.consumer_url().is_some_and(|url| url != callback_url) {
                debug!(%device, stored = ?existing.consumer_url(), %callback_url, "callback url changed, replacing subscription");
                if let Some(endpoint) = self.devices.endpoint(device) {
                    self.unsubscribe_fragments(device, &endpoint, existing.manager_url()).await;
                }
                self.discard(device).await;
            } else {
                debug!(%device, "reusing stored subscription");
                self.scheduler.track(device, &existing);
                self.set_state(device, LifecycleState::Subscribed);
                self.listeners.notify(device, &PushUpdate::Subscribed);
                return;
            }
        }

        if !self.store.is_persistent() {
            self.flush_locked(device, self.config.flush_endpoint_count).await;
        }
        self.subscribe_with(device, &callback_url).await;
    }

    /// Create a fresh subscription, replacing nothing on the camera.
    pub async fn subscribe(&self, device: &DeviceId) {
        let _guard = self.lock(device).await;
        self.subscribe_locked(device).await;
    }

    /// Renew a device's subscription. Called when the renewal timer fires.
    pub async fn renew(&self, device: &DeviceId) {
        let _guard = self.lock(device).await;
        self.renew_locked(device).await;
    }

    /// Cancel a device's subscription.
    pub async fn unsubscribe(&self, device: &DeviceId) {
        let _guard = self.lock(device).await;
        self.unsubscribe_locked(device).await;
    }

    /// Unsubscribe unless a listener registered again in the meantime.
    pub async fn release(&self, device: &DeviceId) {
        let _guard = self.lock(device).await;
        if self.listeners.has_listeners(device) {
            debug!(%device, "listener re-registered, keeping subscription");
            return;
        }
        self.unsubscribe_locked(device).await;
    }

    /// Best-effort Unsubscribe of the camera's well-known notification
    /// endpoints and of any stored subscription.
    ///
    /// Clears subscriptions a previous process left behind when they were not
    /// persisted.
    pub async fn flush_subscriptions(&self, device: &DeviceId, count: usize) {
        let _guard = self.lock(device).await;
        self.flush_locked(device, count).await;
    }

    /// Stop the timer, unsubscribe every stored device and write the store.
    pub async fn shutdown(&self) {
        self.scheduler.cancel();

        let devices: Vec<DeviceId> = self.store.snapshot().await.into_keys().collect();
        info!(count = devices.len(), "unsubscribing all devices");
        join_all(devices.iter().map(|device| self.unsubscribe(device))).await;

        self.store.flush().await;
    }

    #[cfg(test)]
    fn known_devices(&self) -> usize {
        self.locks.len().max(self.states.len())
    }

    async fn lock(&self, device: &DeviceId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(device.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    fn set_state(&self, device: &DeviceId, state: LifecycleState) {
        self.states.insert(device.clone(), state);
    }

    /// Drop the bookkeeping of a device nobody listens to any more.
    ///
    /// The lock entry is only removed when no other task holds or waits on it.
    fn forget_if_idle(&self, device: &DeviceId) {
        if self.listeners.has_listeners(device) {
            return;
        }
        self.states.remove(device);
        self.degraded.lock().remove(device);
        self.locks.remove_if(device, |_, lock| Arc::strong_count(lock) <= 2);
    }

    /// Forget a stored subscription without talking to the camera.
    async fn discard(&self, device: &DeviceId) {
        self.scheduler.untrack(device);
        if self.store.remove(device).await.is_some() {
            self.store.schedule_save();
        }
    }

    async fn register_webhook(&self, device: &DeviceId) -> Option<String> {
        match self.webhooks.register(device).await {
            Ok(url) => Some(url),
            Err(e) => {
                let detail = format!("webhook registration failed: {e}");
                self.fail(device, PushUpdate::Fallback(FallbackReason::NotConfigured), &detail)
                    .await;
                None
            }
        }
    }

    async fn subscribe_locked(&self, device: &DeviceId) -> bool {
        let Some(callback_url) = self.register_webhook(device).await else {
            return false;
        };
        self.subscribe_with(device, &callback_url).await
    }

    async fn subscribe_with(&self, device: &DeviceId, callback_url: &str) -> bool {
        self.set_state(device, LifecycleState::Subscribing);

        let Some(endpoint) = self.devices.endpoint(device) else {
            self.fail(device, PushUpdate::Fallback(FallbackReason::NotConfigured), "device has no onvif endpoint")
                .await;
            return false;
        };

        let mut merged: Option<Subscription> = None;
        for index in 0..endpoint.subscription_count {
            let request = encode_subscribe(callback_url, Some(self.config.default_lease));
            let reply = self
                .send(&endpoint, &request)
                .await
                .map(|response| decode_subscribe_response(response.status, &response.document));

            match into_subscription(reply) {
                Ok(subscription) => {
                    debug!(%device, index, manager_url = ?subscription.manager_url(), "subscribe accepted");
                    merged = Some(match merged {
                        Some(first) => first.merge(subscription),
                        None => subscription,
                    });
                }
                Err(update) => {
                    if let Some(partial) = merged.take() {
                        self.unsubscribe_fragments(device, &endpoint, partial.manager_url()).await;
                    }
                    let detail = format!("subscribe {} of {} failed", index + 1, endpoint.subscription_count);
                    self.fail(device, update, &detail).await;
                    return false;
                }
            }
        }

        let Some(subscription) = merged else {
            return false;
        };
        self.activate(device, subscription.with_consumer_url(callback_url)).await;
        true
    }

    async fn renew_locked(&self, device: &DeviceId) {
        if !self.listeners.has_listeners(device) {
            debug!(%device, "no listeners left, dropping subscription");
            self.discard(device).await;
            self.set_state(device, LifecycleState::Unsubscribed);
            self.forget_if_idle(device);
            return;
        }

        let Some(current) = self.store.get(device).await else {
            debug!(%device, "no subscription to renew, subscribing");
            self.subscribe_locked(device).await;
            return;
        };

        if current.lease().is_none() {
            debug!(%device, "subscription never expires, nothing to renew");
            return;
        }

        let Some(endpoint) = self.devices.endpoint(device) else {
            self.fail(device, PushUpdate::Fallback(FallbackReason::NotConfigured), "device has no onvif endpoint")
                .await;
            return;
        };

        self.set_state(device, LifecycleState::Renewing);

        let mut renewed: Option<Subscription> = None;
        for fragment in current.manager_url() {
            let request = encode_renew(&endpoint.resolve(fragment), Some(self.config.default_lease));
            let reply = self
                .send(&endpoint, &request)
                .await
                .map(|response| decode_renew_response(response.status, &response.document, fragment));

            match into_subscription(reply) {
                Ok(subscription) => {
                    renewed = Some(match renewed {
                        Some(first) => first.merge(subscription),
                        None => subscription,
                    });
                }
                Err(update) => {
                    debug!(%device, %fragment, ?update, "renew failed, replacing subscription");
                    self.unsubscribe_fragments(device, &endpoint, current.manager_url()).await;
                    self.discard(device).await;
                    self.subscribe_locked(device).await;
                    return;
                }
            }
        }

        if let Some(subscription) = renewed {
            debug!(%device, "subscription renewed");
            let subscription = match current.consumer_url() {
                Some(url) => subscription.with_consumer_url(url),
                None => subscription,
            };
            self.activate(device, subscription).await;
        }
    }

    async fn unsubscribe_locked(&self, device: &DeviceId) {
        self.set_state(device, LifecycleState::Unsubscribing);
        self.scheduler.untrack(device);

        if let Some(subscription) = self.store.remove(device).await {
            let remaining = subscription.remaining(Utc::now());
            if remaining.is_some_and(|left| left < self.config.unsubscribe_skip_threshold) {
                debug!(%device, "lease nearly over, leaving it to expire");
            } else if let Some(endpoint) = self.devices.endpoint(device) {
                self.unsubscribe_fragments(device, &endpoint, subscription.manager_url()).await;
            }
            self.store.schedule_save();
        }

        if !self.listeners.has_listeners(device) {
            self.webhooks.unregister(device).await;
        }
        self.set_state(device, LifecycleState::Unsubscribed);
        self.forget_if_idle(device);
    }

    async fn flush_locked(&self, device: &DeviceId, count: usize) {
        let Some(endpoint) = self.devices.endpoint(device) else {
            return;
        };

        let mut fragments: Vec<String> =
            (0..count).map(|index| format!("{NOTIFICATION_PATH_PREFIX}{index}")).collect();
        if let Some(stored) = self.store.remove(device).await {
            self.scheduler.untrack(device);
            self.store.schedule_save();
            for fragment in stored.manager_url() {
                if !fragments.contains(fragment) {
                    fragments.push(fragment.clone());
                }
            }
        }

        debug!(%device, count = fragments.len(), "flushing subscriptions");
        self.unsubscribe_fragments(device, &endpoint, &fragments).await;
    }

    /// Track, persist and announce a confirmed subscription.
    async fn activate(&self, device: &DeviceId, subscription: Subscription) {
        let subscription = match self.devices.clock_offset(device) {
            Some(offset) => subscription.shifted(offset),
            None => subscription,
        };

        self.scheduler.track(device, &subscription);
        self.store.insert(device.clone(), subscription).await;
        self.store.schedule_save();
        self.set_state(device, LifecycleState::Subscribed);

        if self.degraded.lock().remove(device) {
            info!(%device, "push notifications recovered");
        }
        self.listeners.notify(device, &PushUpdate::Subscribed);
    }

    /// Clean up after a failed attempt and tell the listeners.
    async fn fail(&self, device: &DeviceId, update: PushUpdate, detail: &str) {
        self.discard(device).await;
        self.set_state(device, LifecycleState::Unsubscribed);

        if self.degraded.lock().insert(device.clone()) {
            warn!(%device, ?update, "{detail}, falling back to polling");
        } else {
            debug!(%device, ?update, "{detail}");
        }
        self.listeners.notify(device, &update);
        self.forget_if_idle(device);
    }

    async fn unsubscribe_fragments(&self, device: &DeviceId, endpoint: &OnvifEndpoint, fragments: &[String]) {
        for fragment in fragments {
            let request = encode_unsubscribe(&endpoint.resolve(fragment));
            match timeout(self.config.unsubscribe_timeout, self.send(endpoint, &request)).await {
                Ok(Ok(response)) if response.status == 200 => {
                    debug!(%device, %fragment, "unsubscribed");
                }
                Ok(Ok(response)) => {
                    debug!(%device, %fragment, status = response.status, "unsubscribe refused");
                }
                Ok(Err(e)) => debug!(%device, %fragment, error = %e, "unsubscribe failed"),
                Err(_) => debug!(%device, %fragment, "unsubscribe timed out"),
            }
        }
    }

    async fn send(&self, endpoint: &OnvifEndpoint, request: &SoapRequest) -> Result<SoapResponse, SoapError> {
        let token = UsernameToken::new(&endpoint.credentials);
        self.transport
            .send(&endpoint.event_service_url(), request.action, request.envelope(&token))
            .await
    }
}

/// Classify a decoded reply, turning every failure into the update listeners get.
fn into_subscription(reply: Result<SoapReply, SoapError>) -> Result<Subscription, PushUpdate> {
    match reply {
        Ok(SoapReply::Subscription(SubscriptionResult {
            manager_url,
            current_time,
            lease,
        })) => Subscription::new(vec![manager_url], current_time, lease)
            .map_err(|_| PushUpdate::Fallback(FallbackReason::Malformed)),
        Ok(SoapReply::Fault(fault)) => Err(PushUpdate::Error(fault)),
        Ok(SoapReply::Unrecognized) => Err(PushUpdate::Fallback(FallbackReason::Malformed)),
        Err(e) if e.is_no_answer() => Err(PushUpdate::Fallback(FallbackReason::NoAnswer)),
        Err(_) => Err(PushUpdate::Fallback(FallbackReason::Malformed)),
    }
}
