//! Renewal timing.
//!
//! This module contains the [`RenewalScheduler`], which keeps a single timer
//! armed for the tracked subscription that expires first, and the
//! [`RenewalWorker`], which receives fired timers and runs the renewals one at
//! a time.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{PushError, Result};
use crate::lifecycle::SubscriptionLifecycle;
use crate::types::{DeviceId, Subscription};

/// The renewal currently armed on the timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedRenewal {
    pub device_id: DeviceId,
    /// Expiry of the tracked subscription
    pub expires_at: DateTime<Utc>,
    /// When the timer fires: `expires_at - safety_margin`
    pub fire_at: DateTime<Utc>,
}

struct Armed {
    renewal: ArmedRenewal,
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    /// Expiry per tracked device, `None` for leases that never expire
    tracked: HashMap<DeviceId, Option<DateTime<Utc>>>,
    armed: Option<Armed>,
    generation: u64,
    cancelled: bool,
}

/// Single-timer renewal scheduler.
///
/// Every change to the tracked set recomputes the soonest finite expiry. When
/// the target changes, the running timer task is aborted and a new one is
/// spawned. Each timer carries a generation number and only fires if it is
/// still the armed generation when it wakes, so a replaced timer never fires.
///
/// Firing sends the device id over an unbounded channel; the receiving half is
/// returned from [`RenewalScheduler::new`].
pub struct RenewalScheduler {
    safety_margin: Duration,
    minimum_delay: Duration,
    state: Mutex<SchedulerState>,
    fire_tx: mpsc::UnboundedSender<DeviceId>,
    this: Weak<RenewalScheduler>,
}

impl RenewalScheduler {
    /// Create a scheduler and the receiver its timer fires into.
    pub fn new(
        safety_margin: Duration,
        minimum_delay: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DeviceId>) {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new_cyclic(|this| Self {
            safety_margin,
            minimum_delay,
            state: Mutex::new(SchedulerState::default()),
            fire_tx,
            this: this.clone(),
        });
        (scheduler, fire_rx)
    }

    /// Track a device's subscription, replacing any previous entry.
    pub fn track(&self, device: &DeviceId, subscription: &Subscription) {
        let mut state = self.state.lock();
        state.tracked.insert(device.clone(), subscription.expires_at());
        self.rearm(&mut state);
    }

    /// Stop tracking a device.
    pub fn untrack(&self, device: &DeviceId) {
        let mut state = self.state.lock();
        if state.tracked.remove(device).is_some() {
            self.rearm(&mut state);
        }
    }

    pub fn tracked(&self, device: &DeviceId) -> bool {
        self.state.lock().tracked.contains_key(device)
    }

    pub fn tracked_devices(&self) -> Vec<DeviceId> {
        self.state.lock().tracked.keys().cloned().collect()
    }

    /// The renewal the timer is armed for, if any.
    pub fn armed(&self) -> Option<ArmedRenewal> {
        self.state.lock().armed.as_ref().map(|armed| armed.renewal.clone())
    }

    /// Abort the timer and stop arming new ones. Tracking still works.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        if let Some(armed) = state.armed.take() {
            armed.handle.abort();
        }
    }

    fn rearm(&self, state: &mut SchedulerState) {
        if state.cancelled {
            return;
        }

        let soonest = state
            .tracked
            .iter()
            .filter_map(|(device, expires_at)| expires_at.map(|at| (device, at)))
            .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        let Some((device, expires_at)) = soonest else {
            if let Some(armed) = state.armed.take() {
                trace!(device = %armed.renewal.device_id, "no finite lease tracked, timer disarmed");
                armed.handle.abort();
            }
            return;
        };

        if let Some(armed) = &state.armed {
            if armed.renewal.device_id == *device
                && armed.renewal.expires_at == expires_at
                && !armed.handle.is_finished()
            {
                return;
            }
        }

        let fire_at = chrono::Duration::from_std(self.safety_margin)
            .ok()
            .and_then(|margin| expires_at.checked_sub_signed(margin))
            .unwrap_or(expires_at);
        let delay = (fire_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(self.minimum_delay);

        let renewal = ArmedRenewal {
            device_id: device.clone(),
            expires_at,
            fire_at,
        };

        if let Some(previous) = state.armed.take() {
            previous.handle.abort();
        }
        state.generation += 1;
        let generation = state.generation;

        debug!(device = %renewal.device_id, %fire_at, delay_secs = delay.as_secs_f64(), "renewal timer armed");

        let this = self.this.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(scheduler) = this.upgrade() {
                scheduler.fire(generation);
            }
        });

        state.armed = Some(Armed {
            renewal,
            generation,
            handle,
        });
    }

    fn fire(&self, generation: u64) {
        let state = self.state.lock();
        match state.armed.as_ref() {
            Some(armed) if armed.generation == generation => {
                debug!(device = %armed.renewal.device_id, "renewal timer fired");
                let _ = self.fire_tx.send(armed.renewal.device_id.clone());
            }
            _ => trace!(generation, "stale renewal timer ignored"),
        }
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        if let Some(armed) = self.state.get_mut().armed.take() {
            armed.handle.abort();
        }
    }
}

/// Background task that runs renewals fired by the scheduler.
///
/// Renewals run one at a time in the order the timer fired them. The worker
/// holds only a weak reference to the lifecycle and stops once it is gone.
///
/// # Shutdown
///
/// [`RenewalWorker::shutdown`] signals the task and waits up to 5 seconds for
/// it to finish the renewal in progress.
pub struct RenewalWorker {
    background_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl RenewalWorker {
    pub fn start(
        fire_rx: mpsc::UnboundedReceiver<DeviceId>,
        lifecycle: Weak<SubscriptionLifecycle>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let background_task = tokio::spawn(Self::run(fire_rx, lifecycle, shutdown_rx));

        Self {
            background_task: Some(background_task),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Stop the worker.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Shutdown`] if the task panicked or did not stop
    /// within 5 seconds.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(()).await;
        }

        let Some(task) = self.background_task.take() else {
            return Ok(());
        };
        match timeout(Duration::from_secs(5), task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PushError::Shutdown(format!("Renewal worker panicked: {e}"))),
            Err(_) => Err(PushError::Shutdown(
                "Renewal worker shutdown timed out after 5 seconds".to_string(),
            )),
        }
    }

    async fn run(
        mut fire_rx: mpsc::UnboundedReceiver<DeviceId>,
        lifecycle: Weak<SubscriptionLifecycle>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("renewal worker shutting down");
                    break;
                }
                fired = fire_rx.recv() => {
                    let Some(device) = fired else { break };
                    let Some(lifecycle) = lifecycle.upgrade() else { break };
                    lifecycle.renew(&device).await;
                }
            }
        }
    }
}

impl Drop for RenewalWorker {
    fn drop(&mut self) {
        if let Some(task) = self.background_task.take() {
            task.abort();
        }
    }
}
