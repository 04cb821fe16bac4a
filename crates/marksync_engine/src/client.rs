//! Transport boundary.
//!
//! `SyncClient` is the outbound protocol surface the core drives. The
//! transport (network, encryption, word/key derivation) lives behind
//! it; the core never does I/O itself. Inbound callbacks from the
//! transport enter through [`crate::SyncService`].

use crate::prefs::Seed;
use marksync_protocol::{Category, OrderKey, SyncRecord};
use parking_lot::Mutex;

/// Transport-facing configuration passed with init data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    /// Client API version string.
    pub api_version: String,
    /// Sync server URL.
    pub server_url: String,
}

/// A fetched remote record paired with the local state snapshot for
/// the same object id, handed to the transport for resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveCandidate {
    /// The remote record as fetched.
    pub record: SyncRecord,
    /// Local state for the same object, if any.
    pub local: Option<SyncRecord>,
}

/// Outbound protocol surface to the transport layer.
///
/// All methods are fire-and-forget; results come back asynchronously
/// through the service's inbound callbacks.
pub trait SyncClient: Send + Sync {
    /// Announces init data (seed, device id, config, words) after setup.
    fn send_got_init_data(
        &self,
        seed: Option<&Seed>,
        device_id: Option<&str>,
        config: &ClientConfig,
        sync_words: &str,
    );

    /// Requests records for categories changed since `start_at`.
    fn send_fetch_sync_records(&self, categories: &[Category], start_at: u64, max_records: u32);

    /// Requests the current device list.
    fn send_fetch_sync_devices(&self);

    /// Pushes fetched records paired with local state for resolution.
    fn send_resolve_sync_records(&self, category: Category, candidates: &[ResolveCandidate]);

    /// Pushes outgoing records for a category.
    fn send_sync_records(&self, category: Category, records: &[SyncRecord]);

    /// Removes this user from the sync chain.
    fn send_delete_sync_user(&self);

    /// Purges a category server-side.
    fn send_delete_sync_category(&self, category: Category);

    /// Requests the device/platform-scoped base order key.
    fn send_get_bookmarks_base_order(&self, device_id: &str, platform: &str);

    /// Requests an order key between two neighbors.
    fn send_get_bookmark_order(
        &self,
        prev: Option<&OrderKey>,
        next: Option<&OrderKey>,
        parent: &OrderKey,
    );

    /// Asks the transport to render a seed as human-readable words.
    fn need_sync_words(&self, seed: Option<&Seed>);

    /// Asks the transport to derive seed bytes from words.
    fn need_bytes_from_sync_words(&self, words: &str);

    /// Acknowledges that the core observed transport readiness.
    fn on_extension_initialized(&self);

    /// Notifies the transport of an enabled-state change.
    fn on_sync_enabled_changed(&self);
}

/// One recorded outbound call, for assertions in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCall {
    /// `send_got_init_data`.
    GotInitData {
        /// Device id announced, if any.
        device_id: Option<String>,
    },
    /// `send_fetch_sync_records`.
    FetchRecords {
        /// Categories requested.
        categories: Vec<Category>,
        /// Cursor timestamp.
        start_at: u64,
        /// Batch size.
        max_records: u32,
    },
    /// `send_fetch_sync_devices`.
    FetchDevices,
    /// `send_resolve_sync_records`.
    ResolveRecords {
        /// Category being resolved.
        category: Category,
        /// Candidate pairs.
        candidates: Vec<ResolveCandidate>,
    },
    /// `send_sync_records`.
    SendRecords {
        /// Category of the records.
        category: Category,
        /// The records pushed.
        records: Vec<SyncRecord>,
    },
    /// `send_delete_sync_user`.
    DeleteUser,
    /// `send_delete_sync_category`.
    DeleteCategory(Category),
    /// `send_get_bookmarks_base_order`.
    GetBaseOrder {
        /// Device id.
        device_id: String,
        /// Platform tag.
        platform: String,
    },
    /// `send_get_bookmark_order`.
    GetOrder {
        /// Left neighbor.
        prev: Option<OrderKey>,
        /// Right neighbor.
        next: Option<OrderKey>,
        /// Parent order key.
        parent: OrderKey,
    },
    /// `need_sync_words`.
    NeedWords,
    /// `need_bytes_from_sync_words`.
    NeedBytes {
        /// The word phrase.
        words: String,
    },
    /// `on_extension_initialized`.
    ExtensionInitialized,
    /// `on_sync_enabled_changed`.
    EnabledChanged,
}

/// A call-recording client for tests.
#[derive(Debug, Default)]
pub struct MockSyncClient {
    calls: Mutex<Vec<ClientCall>>,
}

impl MockSyncClient {
    /// Creates a new mock client.
    pub fn new() -> Self {
        Self::default()
    }

    /// All calls recorded so far, in order.
    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().clone()
    }

    /// Number of calls matching a predicate.
    pub fn count(&self, pred: impl Fn(&ClientCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Records pushed via `send_sync_records`, flattened.
    pub fn sent_records(&self) -> Vec<(Category, SyncRecord)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ClientCall::SendRecords { category, records } => {
                    Some(records.iter().map(|r| (*category, r.clone())))
                }
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Order-key requests issued so far.
    pub fn order_requests(&self) -> Vec<(Option<OrderKey>, Option<OrderKey>, OrderKey)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ClientCall::GetOrder { prev, next, parent } => {
                    Some((prev.clone(), next.clone(), parent.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Forgets all recorded calls.
    pub fn reset(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: ClientCall) {
        self.calls.lock().push(call);
    }
}

impl SyncClient for MockSyncClient {
    fn send_got_init_data(
        &self,
        _seed: Option<&Seed>,
        device_id: Option<&str>,
        _config: &ClientConfig,
        _sync_words: &str,
    ) {
        self.record(ClientCall::GotInitData {
            device_id: device_id.map(str::to_string),
        });
    }

    fn send_fetch_sync_records(&self, categories: &[Category], start_at: u64, max_records: u32) {
        self.record(ClientCall::FetchRecords {
            categories: categories.to_vec(),
            start_at,
            max_records,
        });
    }

    fn send_fetch_sync_devices(&self) {
        self.record(ClientCall::FetchDevices);
    }

    fn send_resolve_sync_records(&self, category: Category, candidates: &[ResolveCandidate]) {
        self.record(ClientCall::ResolveRecords {
            category,
            candidates: candidates.to_vec(),
        });
    }

    fn send_sync_records(&self, category: Category, records: &[SyncRecord]) {
        self.record(ClientCall::SendRecords {
            category,
            records: records.to_vec(),
        });
    }

    fn send_delete_sync_user(&self) {
        self.record(ClientCall::DeleteUser);
    }

    fn send_delete_sync_category(&self, category: Category) {
        self.record(ClientCall::DeleteCategory(category));
    }

    fn send_get_bookmarks_base_order(&self, device_id: &str, platform: &str) {
        self.record(ClientCall::GetBaseOrder {
            device_id: device_id.to_string(),
            platform: platform.to_string(),
        });
    }

    fn send_get_bookmark_order(
        &self,
        prev: Option<&OrderKey>,
        next: Option<&OrderKey>,
        parent: &OrderKey,
    ) {
        self.record(ClientCall::GetOrder {
            prev: prev.cloned(),
            next: next.cloned(),
            parent: parent.clone(),
        });
    }

    fn need_sync_words(&self, _seed: Option<&Seed>) {
        self.record(ClientCall::NeedWords);
    }

    fn need_bytes_from_sync_words(&self, words: &str) {
        self.record(ClientCall::NeedBytes {
            words: words.to_string(),
        });
    }

    fn on_extension_initialized(&self) {
        self.record(ClientCall::ExtensionInitialized);
    }

    fn on_sync_enabled_changed(&self) {
        self.record(ClientCall::EnabledChanged);
    }
}
