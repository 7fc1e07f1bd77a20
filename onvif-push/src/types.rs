//! Core value types: device identity and subscription records.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PushError, Result};

/// Identifier of a camera, as known to the host.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Create a new device ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the device ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An active push subscription held by a camera.
///
/// Immutable: a renewal replaces the whole record. The lease is either `None`
/// (the camera never expires it) or strictly positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    manager_url: Vec<String>,
    created_at: DateTime<Utc>,
    lease: Option<Duration>,
    consumer_url: Option<String>,
}

impl Subscription {
    /// Create a subscription record.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::InvalidSubscription`] if there are no manager URL
    /// fragments or the lease is zero.
    pub fn new(
        manager_url: Vec<String>,
        created_at: DateTime<Utc>,
        lease: Option<Duration>,
    ) -> Result<Self> {
        if manager_url.is_empty() {
            return Err(PushError::InvalidSubscription(
                "at least one manager url is required".to_string(),
            ));
        }
        if lease.is_some_and(|lease| lease.is_zero()) {
            return Err(PushError::InvalidSubscription(
                "lease must be positive".to_string(),
            ));
        }
        Ok(Self {
            manager_url,
            created_at,
            lease,
            consumer_url: None,
        })
    }

    /// Record the callback URL the camera was given in Subscribe.
    pub fn with_consumer_url(mut self, url: impl Into<String>) -> Self {
        self.consumer_url = Some(url.into());
        self
    }

    /// Path fragments identifying the subscription resources on the camera.
    pub fn manager_url(&self) -> &[String] {
        &self.manager_url
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn lease(&self) -> Option<Duration> {
        self.lease
    }

    /// Callback URL the camera posts to, `None` for records that predate it.
    pub fn consumer_url(&self) -> Option<&str> {
        self.consumer_url.as_deref()
    }

    /// Absolute expiry, `None` for a subscription that never expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let lease = chrono::Duration::from_std(self.lease?).ok()?;
        self.created_at.checked_add_signed(lease)
    }

    /// Time left before expiry at `now`, saturating at zero.
    ///
    /// `None` for a subscription that never expires.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let expires_at = self.expires_at()?;
        Some((expires_at - now).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now).is_some_and(|remaining| remaining.is_zero())
    }

    /// Append another subscription's fragments, keeping this record's timestamp and lease.
    pub fn merge(mut self, other: Subscription) -> Self {
        self.manager_url.extend(other.manager_url);
        self
    }

    /// Move `created_at` by a clock offset, converting device time to host time.
    pub fn shifted(mut self, offset: chrono::Duration) -> Self {
        if let Some(shifted) = self.created_at.checked_add_signed(offset) {
            self.created_at = shifted;
        }
        self
    }
}

/// A subscription in its persisted JSON shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSubscription {
    pub manager_url: Vec<String>,
    /// Creation time, epoch seconds
    pub timestamp: f64,
    /// Lease duration in seconds, not an absolute time
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_url: Option<String>,
}

impl From<&Subscription> for StoredSubscription {
    fn from(value: &Subscription) -> Self {
        let created = value.created_at;
        Self {
            manager_url: value.manager_url.clone(),
            timestamp: created.timestamp() as f64
                + f64::from(created.timestamp_subsec_nanos()) / 1_000_000_000.0,
            expires: value.lease.map(|lease| lease.as_secs_f64()),
            consumer_url: value.consumer_url.clone(),
        }
    }
}

impl TryFrom<StoredSubscription> for Subscription {
    type Error = PushError;

    fn try_from(value: StoredSubscription) -> Result<Self> {
        if !value.timestamp.is_finite() {
            return Err(PushError::InvalidSubscription(format!(
                "invalid timestamp {}",
                value.timestamp
            )));
        }
        let secs = value.timestamp.floor();
        let nanos = ((value.timestamp - secs) * 1_000_000_000.0).round() as u32;
        let created_at = Utc
            .timestamp_opt(secs as i64, nanos.min(999_999_999))
            .single()
            .ok_or_else(|| {
                PushError::InvalidSubscription(format!("invalid timestamp {}", value.timestamp))
            })?;

        let lease = match value.expires {
            None => None,
            Some(seconds) if seconds > 0.0 => Some(
                Duration::try_from_secs_f64(seconds)
                    .map_err(|e| PushError::InvalidSubscription(format!("invalid lease {seconds}: {e}")))?,
            ),
            Some(seconds) => {
                return Err(PushError::InvalidSubscription(format!(
                    "invalid lease {seconds}"
                )))
            }
        };

        let subscription = Subscription::new(value.manager_url, created_at, lease)?;
        Ok(match value.consumer_url {
            Some(url) => subscription.with_consumer_url(url),
            None => subscription,
        })
    }
}
