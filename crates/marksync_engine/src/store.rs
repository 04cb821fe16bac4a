//! Local bookmark store boundary.
//!
//! The host application owns the store; the core holds object ids only
//! and mutates through this trait. The store is shared with the host,
//! so callers re-read sibling state at write time instead of caching
//! neighbors across turns.

use crate::error::{SyncError, SyncResult};
use marksync_protocol::{BookmarkPayload, Category, OrderKey, RecordAction, SyncRecord};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Local representation of a synced node.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Stable identity; matches the wire `object_id`.
    pub object_id: String,
    /// Parent object id; empty for roots.
    pub parent_id: String,
    /// Position among siblings, once assigned.
    pub order_key: Option<OrderKey>,
    /// Bookmark payload.
    pub payload: BookmarkPayload,
    /// True once deleted; tombstones survive until a category purge.
    pub tombstoned: bool,
    /// Milliseconds timestamp of the last applied change.
    pub updated_at: u64,
    /// Device id of the record that last wrote this item, the conflict
    /// tie-break key at equal timestamps. Empty until a remote record
    /// has been applied.
    pub last_writer: String,
}

impl Item {
    /// Creates a live item without an order key yet.
    pub fn new(
        object_id: impl Into<String>,
        parent_id: impl Into<String>,
        payload: BookmarkPayload,
        updated_at: u64,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            parent_id: parent_id.into(),
            order_key: None,
            payload,
            tombstoned: false,
            updated_at,
            last_writer: String::new(),
        }
    }

    /// Snapshot of this item as a wire record, for resolve candidates.
    pub fn to_record(&self, device_id: &str, parent_order: Option<OrderKey>) -> SyncRecord {
        SyncRecord {
            category: Category::Bookmarks,
            action: if self.tombstoned {
                RecordAction::Delete
            } else {
                RecordAction::Update
            },
            object_id: self.object_id.clone(),
            device_id: device_id.to_string(),
            order_key: self.order_key.clone(),
            parent_order_key: parent_order,
            payload: if self.tombstoned {
                None
            } else {
                Some(self.payload.clone().into())
            },
            timestamp: self.updated_at,
        }
    }
}

/// Mutation surface of the host's bookmark store.
pub trait BookmarkStore: Send + Sync {
    /// Looks up an item by object id, tombstoned or not.
    fn get(&self, object_id: &str) -> Option<Item>;

    /// Inserts or replaces an item.
    fn upsert(&self, item: Item) -> SyncResult<()>;

    /// Assigns an order key to an existing item.
    fn set_order_key(&self, object_id: &str, key: OrderKey) -> SyncResult<()>;

    /// Marks an item deleted, keeping the id mapping.
    fn tombstone(&self, object_id: &str, timestamp: u64) -> SyncResult<()>;

    /// Live (non-tombstoned) children of a parent, sorted by order key;
    /// children without a key come last in insertion order.
    fn active_children(&self, parent_id: &str) -> Vec<Item>;

    /// Finds the live item carrying the given order key, if any.
    fn find_by_order_key(&self, key: &OrderKey) -> Option<Item>;

    /// Physically erases tombstones after a category purge.
    fn purge_tombstones(&self);
}

/// In-memory store for tests and embedding without a host.
#[derive(Debug, Default)]
pub struct MemoryBookmarkStore {
    items: RwLock<HashMap<String, Item>>,
}

impl MemoryBookmarkStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items, tombstones included.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns true if the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl BookmarkStore for MemoryBookmarkStore {
    fn get(&self, object_id: &str) -> Option<Item> {
        self.items.read().get(object_id).cloned()
    }

    fn upsert(&self, item: Item) -> SyncResult<()> {
        self.items.write().insert(item.object_id.clone(), item);
        Ok(())
    }

    fn set_order_key(&self, object_id: &str, key: OrderKey) -> SyncResult<()> {
        let mut items = self.items.write();
        let item = items
            .get_mut(object_id)
            .ok_or_else(|| SyncError::Store(format!("unknown object id: {object_id}")))?;
        item.order_key = Some(key);
        Ok(())
    }

    fn tombstone(&self, object_id: &str, timestamp: u64) -> SyncResult<()> {
        let mut items = self.items.write();
        let item = items
            .get_mut(object_id)
            .ok_or_else(|| SyncError::Store(format!("unknown object id: {object_id}")))?;
        item.tombstoned = true;
        item.updated_at = timestamp;
        Ok(())
    }

    fn active_children(&self, parent_id: &str) -> Vec<Item> {
        let items = self.items.read();
        let mut children: Vec<Item> = items
            .values()
            .filter(|i| i.parent_id == parent_id && !i.tombstoned)
            .cloned()
            .collect();
        children.sort_by(|a, b| match (&a.order_key, &b.order_key) {
            (Some(ka), Some(kb)) => ka.cmp(kb),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.object_id.cmp(&b.object_id),
        });
        children
    }

    fn find_by_order_key(&self, key: &OrderKey) -> Option<Item> {
        self.items
            .read()
            .values()
            .find(|i| !i.tombstoned && i.order_key.as_ref() == Some(key))
            .cloned()
    }

    fn purge_tombstones(&self) {
        self.items.write().retain(|_, i| !i.tombstoned);
    }
}
