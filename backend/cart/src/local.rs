//! # Local Cart Store
//!
//! Anonymous shoppers keep their cart on the device. The record is tiny and
//! rewritten wholesale on every change:
//!
//! ```json
//! {"slugs": ["burger", "fries"], "updatedAt": "2026-10-18T12:00:00Z", "v": 1}
//! ```
//!
//! Reads never fail. Anything unreadable (missing, unparsable, wrong version
//! tag, slugs not a list of strings) comes back as a fresh empty cart.
//!
//! Handles created with [`LocalCartStore::tab`] share storage and a change
//! bus, like browser tabs of one origin. A write on one handle is announced
//! to subscribers of every other handle; a handle never hears its own writes.
use std::{
    collections::HashMap,
    fs,
    io::{self, ErrorKind},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

pub const STORAGE_KEY: &str = "kitchen.cart";
pub const LOCAL_CART_VERSION: u8 = 1;

const BUS_CAPACITY: usize = 64;

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCart {
    pub slugs: Vec<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "v")]
    pub version: u8,
}

impl LocalCart {
    pub fn new(slugs: Vec<String>) -> Self {
        Self {
            slugs,
            updated_at: Utc::now(),
            version: LOCAL_CART_VERSION,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Decodes a stored record, falling back to an empty cart.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::empty();
        };

        match serde_json::from_str::<LocalCart>(raw) {
            Ok(cart) if cart.version == LOCAL_CART_VERSION => cart,
            Ok(cart) => {
                debug!("Discarding local cart with version {}", cart.version);
                Self::empty()
            }
            Err(e) => {
                debug!("Discarding unreadable local cart: {e}");
                Self::empty()
            }
        }
    }
}

/// Synchronous key-value persistence, the device's local storage.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> io::Result<()>;
}

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());

        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(key.to_string(), value.to_string());

        Ok(())
    }
}

/// One file per key under a directory. Writes go to a temp file first and
/// are renamed into place, so a reader never sees half a record.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        Ok(Self { root })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");

        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)
    }
}

/// Change notification carried on the shared bus.
#[derive(Debug, Clone)]
pub struct StorageEvent {
    pub key: String,
    pub value: String,
    pub origin: u64,
}

#[derive(Clone)]
pub struct LocalCartStore {
    storage: Arc<dyn Storage>,
    key: String,
    bus: broadcast::Sender<StorageEvent>,
    origin: u64,
}

impl LocalCartStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_key(storage, STORAGE_KEY)
    }

    pub fn with_key(storage: Arc<dyn Storage>, key: impl Into<String>) -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);

        Self {
            storage,
            key: key.into(),
            bus,
            origin: NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Another handle on the same storage and bus, with its own identity.
    pub fn tab(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            key: self.key.clone(),
            bus: self.bus.clone(),
            origin: NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn read(&self) -> LocalCart {
        read_cart(self.storage.as_ref(), &self.key)
    }

    pub fn write(&self, next: &LocalCart) {
        let value = match serde_json::to_string(next) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to encode local cart: {e}");
                return;
            }
        };

        if let Err(e) = self.storage.set(&self.key, &value) {
            warn!("Failed to persist local cart: {e}");
        }

        // No receivers is fine: no other tab is listening.
        let _ = self.bus.send(StorageEvent {
            key: self.key.clone(),
            value,
            origin: self.origin,
        });
    }

    pub fn set_slugs(&self, slugs: Vec<String>) {
        self.write(&LocalCart::new(slugs));
    }

    pub fn clear(&self) {
        self.set_slugs(Vec::new());
    }

    /// Changes written by other handles.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.bus.subscribe(),
            storage: self.storage.clone(),
            key: self.key.clone(),
            origin: self.origin,
        }
    }
}

fn read_cart(storage: &dyn Storage, key: &str) -> LocalCart {
    match storage.get(key) {
        Ok(raw) => LocalCart::parse(raw.as_deref()),
        Err(e) => {
            warn!("Local cart unreadable, starting empty: {e}");
            LocalCart::empty()
        }
    }
}

/// Holds no bus sender, so it ends when the last store handle is dropped.
pub struct Subscription {
    receiver: broadcast::Receiver<StorageEvent>,
    storage: Arc<dyn Storage>,
    key: String,
    origin: u64,
}

impl Subscription {
    /// Next cart written by another tab, or `None` once every handle is gone.
    pub async fn recv(&mut self) -> Option<LocalCart> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.origin == self.origin || event.key != self.key => continue,
                Ok(event) => return Some(LocalCart::parse(Some(&event.value))),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Missed {skipped} local cart events, rereading");
                    return Some(read_cart(self.storage.as_ref(), &self.key));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
