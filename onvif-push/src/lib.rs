//! # onvif-push
//!
//! Keeps ONVIF WS-Notification push subscriptions alive for cameras that have
//! listeners, and turns the camera's `Notify` deliveries into motion events.
//!
//! - The first listener registered for a device subscribes it, pointing the
//!   camera at a webhook.
//! - A single timer renews the subscription that expires first, a little
//!   before its lease runs out.
//! - The last listener leaving unsubscribes.
//! - Subscriptions are persisted so a restart can reuse them.
//!
//! Camera failures never surface as errors. Listeners receive a
//! [`PushUpdate::Error`] or [`PushUpdate::Fallback`] and are expected to poll
//! until a later [`PushUpdate::Subscribed`].
//!
//! See [`PushManager`] for an example.

mod config;
mod dispatcher;
mod error;
mod event;
mod host;
mod lifecycle;
pub mod logging;
mod manager;
mod scheduler;
pub mod store;
mod types;
mod webhook;

pub use config::PushConfig;
pub use dispatcher::{Listener, ListenerHandle, ListenerId, ListenerRegistry};
pub use error::{PushError, Result, StoreError};
pub use event::{AiType, ChannelMotion, FallbackReason, MotionEvent, PushUpdate, Rule};
pub use host::{DeviceDirectory, NotificationSink, OnvifEndpoint, StaticDevices, WebhookService};
pub use lifecycle::LifecycleState;
pub use manager::{PushManager, PushManagerBuilder, DEFAULT_CALLBACK_PORTS};
pub use scheduler::ArmedRenewal;
pub use store::{JsonFileStorage, MemoryStorage, NoStorage, Storage, StoredSubscriptions};
pub use types::{DeviceId, StoredSubscription, Subscription};
pub use webhook::CallbackWebhooks;

pub use callback_server::CallbackServer;
pub use soap_client::{Credentials, Fault, SoapError, SoapResponse, SoapTransport};
