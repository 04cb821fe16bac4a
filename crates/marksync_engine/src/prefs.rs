//! Host-persisted sync state.
//!
//! The host application owns the pref store; the core reads and writes
//! through this boundary trait only.

use marksync_protocol::Category;
use parking_lot::RwLock;
use std::collections::HashMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Sync seed bytes. Zeroized on drop; never logged.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Seed(Vec<u8>);

impl Seed {
    /// Wraps seed bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns true if the seed is empty (not yet established).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Seed({} bytes)", self.0.len())
    }
}

/// Persisted sync preferences, owned by the host.
pub trait SyncPrefs: Send + Sync {
    /// Whether sync is enabled.
    fn is_enabled(&self) -> bool;
    /// Persists the enabled flag.
    fn set_enabled(&self, enabled: bool);

    /// This device's id, once established.
    fn device_id(&self) -> Option<String>;
    /// Persists the device id.
    fn set_device_id(&self, device_id: &str);

    /// The device name chosen at setup.
    fn device_name(&self) -> Option<String>;
    /// Persists the device name.
    fn set_device_name(&self, name: &str);

    /// The sync seed, once established.
    fn seed(&self) -> Option<Seed>;
    /// Persists the seed.
    fn set_seed(&self, seed: Seed);

    /// Last-fetch cursor timestamp for a category.
    fn last_fetch(&self, category: Category) -> u64;
    /// Advances the last-fetch cursor for a category.
    fn set_last_fetch(&self, category: Category, timestamp: u64);

    /// Clears everything, leaving the store as on a fresh profile.
    fn clear(&self);
}

#[derive(Default)]
struct PrefsInner {
    enabled: bool,
    device_id: Option<String>,
    device_name: Option<String>,
    seed: Option<Seed>,
    cursors: HashMap<Category, u64>,
}

/// In-memory pref store for tests and embedding without a host.
#[derive(Default)]
pub struct MemorySyncPrefs {
    inner: RwLock<PrefsInner>,
}

impl MemorySyncPrefs {
    /// Creates an empty pref store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncPrefs for MemorySyncPrefs {
    fn is_enabled(&self) -> bool {
        self.inner.read().enabled
    }

    fn set_enabled(&self, enabled: bool) {
        self.inner.write().enabled = enabled;
    }

    fn device_id(&self) -> Option<String> {
        self.inner.read().device_id.clone()
    }

    fn set_device_id(&self, device_id: &str) {
        self.inner.write().device_id = Some(device_id.to_string());
    }

    fn device_name(&self) -> Option<String> {
        self.inner.read().device_name.clone()
    }

    fn set_device_name(&self, name: &str) {
        self.inner.write().device_name = Some(name.to_string());
    }

    fn seed(&self) -> Option<Seed> {
        self.inner.read().seed.clone()
    }

    fn set_seed(&self, seed: Seed) {
        self.inner.write().seed = Some(seed);
    }

    fn last_fetch(&self, category: Category) -> u64 {
        self.inner.read().cursors.get(&category).copied().unwrap_or(0)
    }

    fn set_last_fetch(&self, category: Category, timestamp: u64) {
        self.inner.write().cursors.insert(category, timestamp);
    }

    fn clear(&self) {
        *self.inner.write() = PrefsInner::default();
    }
}
