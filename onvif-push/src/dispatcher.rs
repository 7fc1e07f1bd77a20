//! Listener registration and notification delivery.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use soap_client::decode_notify;
use tracing::{debug, error, trace, warn};

use crate::event::{MotionEvent, PushUpdate};
use crate::host::NotificationSink;
use crate::lifecycle::{LifecycleState, SubscriptionLifecycle};
use crate::types::DeviceId;

/// Callback invoked with every update for a device
pub type Listener = Arc<dyn Fn(&PushUpdate) + Send + Sync>;

/// Stable identifier of a registered listener
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct ListenerId(u64);

/// Per-device listener lists.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<DeviceId, Vec<(ListenerId, Listener)>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Returns its id and whether it is the device's first.
    pub fn add(&self, device: &DeviceId, listener: Listener) -> (ListenerId, bool) {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.lock();
        let list = listeners.entry(device.clone()).or_default();
        list.push((id, listener));
        (id, list.len() == 1)
    }

    /// Remove a listener. Returns true if it was the device's last one.
    pub fn remove(&self, device: &DeviceId, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(device) else {
            return false;
        };
        let before = list.len();
        list.retain(|(listener_id, _)| *listener_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(device);
        }
        removed && !listeners.contains_key(device)
    }

    pub fn has_listeners(&self, device: &DeviceId) -> bool {
        self.listeners.lock().contains_key(device)
    }

    pub fn listener_count(&self, device: &DeviceId) -> usize {
        self.listeners.lock().get(device).map_or(0, Vec::len)
    }

    /// Invoke every listener of a device, in registration order.
    ///
    /// A panicking listener is logged and does not stop the others.
    pub fn notify(&self, device: &DeviceId, update: &PushUpdate) {
        let listeners: Vec<(ListenerId, Listener)> = match self.listeners.lock().get(device) {
            Some(list) => list.clone(),
            None => return,
        };

        trace!(%device, count = listeners.len(), ?update, "notifying listeners");
        for (id, listener) in listeners {
            invoke(device, id, &listener, update);
        }
    }

    /// Invoke a single listener of a device, if it is still registered.
    pub fn notify_one(&self, device: &DeviceId, id: ListenerId, update: &PushUpdate) {
        let listener = self
            .listeners
            .lock()
            .get(device)
            .and_then(|list| list.iter().find(|(listener_id, _)| *listener_id == id))
            .map(|(_, listener)| Arc::clone(listener));
        if let Some(listener) = listener {
            invoke(device, id, &listener, update);
        }
    }
}

fn invoke(device: &DeviceId, id: ListenerId, listener: &Listener, update: &PushUpdate) {
    if catch_unwind(AssertUnwindSafe(|| listener(update))).is_err() {
        error!(%device, listener = id.0, "listener panicked");
    }
}

impl NotificationSink for ListenerRegistry {
    fn deliver(&self, device: &DeviceId, body: &[u8]) -> u16 {
        let notify = match decode_notify(body) {
            Ok(Some(notify)) => notify,
            Ok(None) => {
                debug!(%device, "delivery carried no notification messages");
                return 200;
            }
            Err(e) => {
                warn!(%device, error = %e, "rejecting undecodable delivery");
                return 500;
            }
        };

        let event = MotionEvent::from_notify(&notify);
        if event.is_empty() {
            debug!(%device, messages = notify.messages.len(), "no recognized rules in delivery");
            return 200;
        }
        self.notify(device, &PushUpdate::Event(event));
        200
    }
}

/// Entry point for listeners: registering a listener while the device has no
/// subscription establishes one, releasing the last listener tears it down.
pub struct NotificationDispatcher {
    registry: Arc<ListenerRegistry>,
    lifecycle: Weak<SubscriptionLifecycle>,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<ListenerRegistry>, lifecycle: Weak<SubscriptionLifecycle>) -> Self {
        Self {
            registry,
            lifecycle,
        }
    }

    /// Register a listener for a device.
    ///
    /// If the device has no subscription (first listener, or the last attempt
    /// failed) this waits for a new attempt; its outcome reaches every listener
    /// of the device. A listener joining a live subscription is told
    /// `Subscribed` right away. One joining an attempt in flight gets that
    /// attempt's outcome.
    pub async fn register(&self, device: &DeviceId, listener: Listener) -> ListenerHandle {
        let (id, first) = self.registry.add(device, listener);
        debug!(%device, first, "listener registered");

        if let Some(lifecycle) = self.lifecycle.upgrade() {
            match lifecycle.state(device) {
                _ if first => lifecycle.ensure_subscribed(device).await,
                LifecycleState::Unsubscribed | LifecycleState::Unsubscribing => {
                    debug!(%device, "no subscription to join, subscribing again");
                    lifecycle.ensure_subscribed(device).await;
                }
                LifecycleState::Subscribed | LifecycleState::Renewing => {
                    self.registry.notify_one(device, id, &PushUpdate::Subscribed);
                }
                LifecycleState::Subscribing => {}
            }
        }

        ListenerHandle {
            device: device.clone(),
            id,
            registry: Arc::clone(&self.registry),
            lifecycle: self.lifecycle.clone(),
            active: true,
        }
    }

    /// Decode a webhook body and deliver it to the device's listeners.
    pub fn deliver(&self, device: &DeviceId, body: &[u8]) -> u16 {
        self.registry.deliver(device, body)
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }
}

/// Registration of one listener. Dropping it unregisters the listener.
pub struct ListenerHandle {
    device: DeviceId,
    id: ListenerId,
    registry: Arc<ListenerRegistry>,
    lifecycle: Weak<SubscriptionLifecycle>,
    active: bool,
}

impl ListenerHandle {
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Unregister the listener, waiting for the unsubscribe if it was the last.
    pub async fn unregister(mut self) {
        self.active = false;
        release(
            &self.registry,
            self.lifecycle.clone(),
            self.device.clone(),
            self.id,
        )
        .await;
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let registry = Arc::clone(&self.registry);
        let lifecycle = self.lifecycle.clone();
        let device = self.device.clone();
        let id = self.id;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { release(&registry, lifecycle, device, id).await });
            }
            Err(_) => {
                // Without a runtime the listener is removed but the camera
                // keeps the subscription until its lease runs out.
                registry.remove(&device, id);
            }
        }
    }
}

async fn release(
    registry: &ListenerRegistry,
    lifecycle: Weak<SubscriptionLifecycle>,
    device: DeviceId,
    id: ListenerId,
) {
    if !registry.remove(&device, id) {
        return;
    }
    debug!(%device, "last listener removed");
    if let Some(lifecycle) = lifecycle.upgrade() {
        lifecycle.release(&device).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const MOTION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"
    xmlns:wsnt="http://docs.oasis-open.org/wsn/b-2"
    xmlns:tt="http://www.onvif.org/ver10/schema">
  <env:Body>
    <wsnt:Notify>
      <wsnt:NotificationMessage>
        <wsnt:Topic Dialect="http://www.onvif.org/ver10/tev/topicExpression/ConcreteSet">tns1:RuleEngine/CellMotionDetector/Motion</wsnt:Topic>
        <wsnt:Message>
          <tt:Message UtcTime="2024-01-01T00:00:00Z">
            <tt:Source><tt:SimpleItem Name="Source" Value="0"/></tt:Source>
            <tt:Data><tt:SimpleItem Name="IsMotion" Value="true"/></tt:Data>
          </tt:Message>
        </wsnt:Message>
      </wsnt:NotificationMessage>
    </wsnt:Notify>
  </env:Body>
</env:Envelope>"#;

    fn counting(count: &Arc<AtomicUsize>) -> Listener {
        let count = Arc::clone(count);
        Arc::new(move |_update: &PushUpdate| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_first_and_last_listener() {
        let registry = ListenerRegistry::new();
        let device = DeviceId::new("cam");
        let count = Arc::new(AtomicUsize::new(0));

        let (a, first) = registry.add(&device, counting(&count));
        assert!(first);
        let (b, first) = registry.add(&device, counting(&count));
        assert!(!first);
        assert_eq!(registry.listener_count(&device), 2);

        assert!(!registry.remove(&device, a));
        assert!(!registry.remove(&device, a));
        assert!(registry.remove(&device, b));
        assert!(!registry.has_listeners(&device));
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let registry = ListenerRegistry::new();
        let device = DeviceId::new("cam");
        let count = Arc::new(AtomicUsize::new(0));

        registry.add(&device, counting(&count));
        registry.add(&device, Arc::new(|_: &PushUpdate| panic!("listener failure")));
        registry.add(&device, counting(&count));

        registry.notify(&device, &PushUpdate::Subscribed);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_notify_one_reaches_only_that_listener() {
        let registry = ListenerRegistry::new();
        let device = DeviceId::new("cam");
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        registry.add(&device, counting(&first));
        let (id, _) = registry.add(&device, counting(&second));

        registry.notify_one(&device, id, &PushUpdate::Subscribed);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        registry.remove(&device, id);
        registry.notify_one(&device, id, &PushUpdate::Subscribed);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deliver_motion_event() {
        let registry = ListenerRegistry::new();
        let device = DeviceId::new("cam");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.add(&device, Arc::new(move |update: &PushUpdate| sink.lock().push(update.clone())));

        assert_eq!(registry.deliver(&device, MOTION.as_bytes()), 200);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let PushUpdate::Event(event) = &seen[0] else {
            panic!("expected an event, got {:?}", seen[0]);
        };
        assert_eq!(event.channel(0).unwrap().detected, Some(true));
    }

    #[test]
    fn test_deliver_statuses() {
        let registry = ListenerRegistry::new();
        let device = DeviceId::new("cam");
        let count = Arc::new(AtomicUsize::new(0));
        registry.add(&device, counting(&count));

        let empty = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Body/></env:Envelope>"#;
        assert_eq!(registry.deliver(&device, empty.as_bytes()), 200);
        assert_eq!(registry.deliver(&device, b"not xml at all <"), 500);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_deliver_without_listeners() {
        let registry = ListenerRegistry::new();
        assert_eq!(registry.deliver(&DeviceId::new("nobody"), MOTION.as_bytes()), 200);
    }
}
