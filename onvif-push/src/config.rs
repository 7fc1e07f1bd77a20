//! Configuration types for the onvif-push crate
//!
//! This module defines the knobs that control subscription leases, renewal
//! timing, persistence debouncing and network timeouts.

use std::time::Duration;

use crate::error::{PushError, Result};

/// Configuration for the PushManager
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Lease requested on Subscribe and Renew
    /// Default: 1 hour
    pub default_lease: Duration,

    /// How long before expiry a renewal fires
    /// Default: 10 seconds
    pub safety_margin: Duration,

    /// Lower bound on the renewal timer delay
    /// Default: 1 second
    pub minimum_renewal_delay: Duration,

    /// Below this remaining lease, Unsubscribe is not sent and the camera is
    /// left to expire the subscription itself
    /// Default: 1 second
    pub unsubscribe_skip_threshold: Duration,

    /// Debounce delay for persisting subscriptions
    /// Default: 1 second
    pub save_delay: Duration,

    /// Bound on each best-effort Unsubscribe attempt (flush, shutdown)
    /// Default: 5 seconds
    pub unsubscribe_timeout: Duration,

    /// Persist subscriptions across restarts when no storage is given explicitly
    /// Default: true
    pub persist_subscriptions: bool,

    /// Number of well-known notification endpoints cleared by a flush
    /// Default: 3
    pub flush_endpoint_count: usize,

    /// TCP connect timeout for camera requests
    /// Default: 5 seconds
    pub connect_timeout: Duration,

    /// Overall timeout for camera requests
    /// Default: 10 seconds
    pub request_timeout: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            default_lease: Duration::from_secs(3600), // 1 hour
            safety_margin: Duration::from_secs(10),
            minimum_renewal_delay: Duration::from_secs(1),
            unsubscribe_skip_threshold: Duration::from_secs(1),
            save_delay: Duration::from_secs(1),
            unsubscribe_timeout: Duration::from_secs(5),
            persist_subscriptions: true,
            flush_endpoint_count: 3,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl PushConfig {
    /// Create a new PushConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a PushConfig with short leases, for cameras that drop long ones
    pub fn short_lease() -> Self {
        Self {
            default_lease: Duration::from_secs(300), // 5 minutes
            safety_margin: Duration::from_secs(15),
            ..Default::default()
        }
    }

    /// Create a PushConfig that gives up quickly on unreachable cameras
    pub fn fast_shutdown() -> Self {
        Self {
            unsubscribe_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(3),
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.default_lease <= self.safety_margin {
            return Err(PushError::Configuration(
                "Default lease must be longer than the safety margin".to_string(),
            ));
        }

        if self.minimum_renewal_delay == Duration::ZERO {
            return Err(PushError::Configuration(
                "Minimum renewal delay must be greater than 0".to_string(),
            ));
        }

        if self.unsubscribe_timeout == Duration::ZERO {
            return Err(PushError::Configuration(
                "Unsubscribe timeout must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout == Duration::ZERO || self.request_timeout == Duration::ZERO {
            return Err(PushError::Configuration(
                "Network timeouts must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout > self.request_timeout {
            return Err(PushError::Configuration(
                "Connect timeout must not exceed the request timeout".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method: set default lease
    pub fn with_default_lease(mut self, lease: Duration) -> Self {
        self.default_lease = lease;
        self
    }

    /// Builder method: set renewal safety margin
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Builder method: set minimum renewal delay
    pub fn with_minimum_renewal_delay(mut self, delay: Duration) -> Self {
        self.minimum_renewal_delay = delay;
        self
    }

    /// Builder method: set unsubscribe skip threshold
    pub fn with_unsubscribe_skip_threshold(mut self, threshold: Duration) -> Self {
        self.unsubscribe_skip_threshold = threshold;
        self
    }

    /// Builder method: set persistence debounce delay
    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    /// Builder method: set per-attempt unsubscribe timeout
    pub fn with_unsubscribe_timeout(mut self, timeout: Duration) -> Self {
        self.unsubscribe_timeout = timeout;
        self
    }

    /// Builder method: enable or disable persistence
    pub fn with_persist_subscriptions(mut self, persist: bool) -> Self {
        self.persist_subscriptions = persist;
        self
    }

    /// Builder method: set number of endpoints cleared by a flush
    pub fn with_flush_endpoint_count(mut self, count: usize) -> Self {
        self.flush_endpoint_count = count;
        self
    }

    /// Builder method: set network timeouts
    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }
}
