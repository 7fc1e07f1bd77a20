//! Persistence of active subscriptions.
//!
//! The [`SubscriptionStore`] keeps the in-memory map of subscriptions, loads it
//! lazily from a [`Storage`] backend on first use and writes it back with a
//! debounce so bursts of changes coalesce into one write. Expired entries are
//! dropped both when loading and when saving.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::types::{DeviceId, StoredSubscription, Subscription};

/// Persisted payload, keyed by device id
pub type StoredSubscriptions = BTreeMap<String, StoredSubscription>;

const STORAGE_VERSION: u32 = 1;
const STORAGE_FILE: &str = "onvif_push_subscriptions.json";

/// Backend that loads and saves the persisted payload.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load(&self) -> Result<Option<StoredSubscriptions>, StoreError>;

    async fn save(&self, data: &StoredSubscriptions) -> Result<(), StoreError>;

    /// Whether saved data survives a restart.
    fn is_persistent(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionedFile {
    version: u32,
    data: StoredSubscriptions,
}

/// JSON file storage
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage in the platform data directory, e.g. `~/.local/share/onvif-push/`.
    pub fn in_data_dir() -> Option<Self> {
        let dir = dirs::data_dir()?.join("onvif-push");
        Some(Self::new(dir.join(STORAGE_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn load(&self) -> Result<Option<StoredSubscriptions>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: VersionedFile = serde_json::from_slice(&bytes)?;
        if file.version != STORAGE_VERSION {
            return Err(StoreError::UnsupportedVersion(file.version));
        }
        Ok(Some(file.data))
    }

    async fn save(&self, data: &StoredSubscriptions) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = VersionedFile {
            version: STORAGE_VERSION,
            data: data.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-memory storage, persistent for the lifetime of the value
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<Option<StoredSubscriptions>>,
    saves: Mutex<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with previously saved data.
    pub fn with_data(data: StoredSubscriptions) -> Self {
        Self {
            data: Mutex::new(Some(data)),
            saves: Mutex::new(0),
        }
    }

    /// Last saved payload.
    pub fn data(&self) -> Option<StoredSubscriptions> {
        self.data.lock().clone()
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load(&self) -> Result<Option<StoredSubscriptions>, StoreError> {
        Ok(self.data.lock().clone())
    }

    async fn save(&self, data: &StoredSubscriptions) -> Result<(), StoreError> {
        *self.data.lock() = Some(data.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}

/// Storage that keeps nothing. Subscriptions are forgotten on restart, so
/// the lifecycle clears leftovers on the camera before subscribing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStorage;

#[async_trait]
impl Storage for NoStorage {
    async fn load(&self) -> Result<Option<StoredSubscriptions>, StoreError> {
        Ok(None)
    }

    async fn save(&self, _data: &StoredSubscriptions) -> Result<(), StoreError> {
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

/// In-memory subscription map backed by a [`Storage`].
pub struct SubscriptionStore {
    storage: Arc<dyn Storage>,
    save_delay: Duration,
    loaded: OnceCell<()>,
    entries: Mutex<HashMap<DeviceId, Subscription>>,
    /// Payload waiting for the debounce timer
    pending: Mutex<Option<StoredSubscriptions>>,
}

impl SubscriptionStore {
    pub fn new(storage: Arc<dyn Storage>, save_delay: Duration) -> Self {
        Self {
            storage,
            save_delay,
            loaded: OnceCell::new(),
            entries: Mutex::new(HashMap::new()),
            pending: Mutex::new(None),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.storage.is_persistent()
    }

    /// Load persisted subscriptions once. Concurrent callers share the same load.
    pub async fn load(&self) {
        self.loaded
            .get_or_init(|| async {
                let stored = match self.storage.load().await {
                    Ok(stored) => stored.unwrap_or_default(),
                    Err(e) => {
                        warn!(error = %e, "failed to load stored subscriptions, starting empty");
                        StoredSubscriptions::new()
                    }
                };

                let now = Utc::now();
                let mut entries = self.entries.lock();
                for (device, stored) in stored {
                    match Subscription::try_from(stored) {
                        Ok(sub) if sub.is_expired(now) => {
                            debug!(%device, "dropping expired stored subscription");
                        }
                        Ok(sub) => {
                            entries.entry(DeviceId::new(device)).or_insert(sub);
                        }
                        Err(e) => warn!(%device, error = %e, "dropping invalid stored subscription"),
                    }
                }
                debug!(count = entries.len(), "loaded stored subscriptions");
            })
            .await;
    }

    pub async fn get(&self, device: &DeviceId) -> Option<Subscription> {
        self.load().await;
        self.entries.lock().get(device).cloned()
    }

    pub async fn insert(&self, device: DeviceId, subscription: Subscription) {
        self.load().await;
        self.entries.lock().insert(device, subscription);
    }

    pub async fn remove(&self, device: &DeviceId) -> Option<Subscription> {
        self.load().await;
        self.entries.lock().remove(device)
    }

    pub async fn snapshot(&self) -> HashMap<DeviceId, Subscription> {
        self.load().await;
        self.entries.lock().clone()
    }

    /// Serialized form of the current entries with expired ones left out.
    fn payload(&self, now: DateTime<Utc>) -> StoredSubscriptions {
        self.entries
            .lock()
            .iter()
            .filter(|(_, sub)| !sub.is_expired(now))
            .map(|(device, sub)| (device.to_string(), StoredSubscription::from(sub)))
            .collect()
    }

    /// Schedule a debounced save of the current entries.
    ///
    /// The payload is captured now; later mutations are picked up by their own
    /// call. Calls within the debounce window share a single write.
    pub fn schedule_save(self: &Arc<Self>) {
        let payload = self.payload(Utc::now());
        let start_timer = {
            let mut pending = self.pending.lock();
            let idle = pending.is_none();
            *pending = Some(payload);
            idle
        };

        if start_timer {
            let store = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(store.save_delay).await;
                store.write_pending().await;
            });
        }
    }

    /// Write any pending payload immediately.
    pub async fn flush(&self) {
        self.write_pending().await;
    }

    async fn write_pending(&self) {
        let Some(payload) = self.pending.lock().take() else {
            return;
        };
        match self.storage.save(&payload).await {
            Ok(()) => debug!(count = payload.len(), "saved subscriptions"),
            Err(e) => warn!(error = %e, "failed to save subscriptions"),
        }
    }
}
