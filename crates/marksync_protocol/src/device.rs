//! Synced device records.

use serde::{Deserialize, Serialize};

/// A device participating in the sync chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Stable device identity; also the conflict tie-break key.
    pub device_id: String,
    /// Human-readable name chosen at setup.
    pub display_name: String,
    /// Platform tag, e.g. "linux" or "android".
    pub platform: String,
    /// Milliseconds timestamp of the last record seen from this device.
    pub last_seen: u64,
}

/// The known devices of a sync chain, ordered by device id.
///
/// # Invariants
///
/// - At most one entry per device id
/// - Entries stay sorted by device id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceList {
    devices: Vec<DeviceRecord>,
}

impl DeviceList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a device, keeping the list sorted.
    pub fn upsert(&mut self, device: DeviceRecord) {
        match self
            .devices
            .binary_search_by(|d| d.device_id.cmp(&device.device_id))
        {
            Ok(i) => self.devices[i] = device,
            Err(i) => self.devices.insert(i, device),
        }
    }

    /// Removes a device by id. Returns true if it was present.
    pub fn remove(&mut self, device_id: &str) -> bool {
        match self
            .devices
            .binary_search_by(|d| d.device_id.as_str().cmp(device_id))
        {
            Ok(i) => {
                self.devices.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// Looks up a device by id.
    pub fn get(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.devices
            .binary_search_by(|d| d.device_id.as_str().cmp(device_id))
            .ok()
            .map(|i| &self.devices[i])
    }

    /// Bumps `last_seen` for a device if it is known.
    pub fn mark_seen(&mut self, device_id: &str, timestamp: u64) {
        if let Ok(i) = self
            .devices
            .binary_search_by(|d| d.device_id.as_str().cmp(device_id))
        {
            let d = &mut self.devices[i];
            d.last_seen = d.last_seen.max(timestamp);
        }
    }

    /// All devices, sorted by device id.
    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if no devices are known.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
