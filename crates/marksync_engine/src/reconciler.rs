//! Remote record reconciliation.
//!
//! Merges a batch of resolved remote records into local state. A
//! winner pre-pass keeps one record per object (deletes beat edits,
//! then newest timestamp, then lowest device id) so the outcome is
//! independent of arrival order, and every store write happens inside
//! a remote-originated scope so it cannot echo back out through the
//! change processor.

use crate::context::SessionContext;
use crate::store::{BookmarkStore, Item};
use marksync_protocol::{
    Category, DeviceList, DeviceRecord, RecordAction, RecordPayload, SyncRecord,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One net change applied to local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedChange {
    /// A new item was created.
    Created(String),
    /// An existing item's payload or order key was overwritten.
    Updated(String),
    /// An item was re-slotted under a different parent.
    Moved(String),
    /// An item was tombstoned.
    Tombstoned(String),
    /// A device entry was inserted or replaced.
    DeviceUpserted(String),
    /// A device entry was removed.
    DeviceRemoved(String),
}

/// Merges remote record batches into the local store and device list.
pub struct RecordReconciler<S: BookmarkStore> {
    store: Arc<S>,
    context: Arc<SessionContext>,
    devices: RwLock<DeviceList>,
    device_id: RwLock<Option<String>>,
}

impl<S: BookmarkStore> RecordReconciler<S> {
    /// Creates a reconciler over a store and session context.
    pub fn new(store: Arc<S>, context: Arc<SessionContext>) -> Self {
        Self {
            store,
            context,
            devices: RwLock::new(DeviceList::new()),
            device_id: RwLock::new(None),
        }
    }

    /// Sets this device's identity, the tie-break key for conflicts.
    pub fn set_identity(&self, device_id: &str) {
        *self.device_id.write() = Some(device_id.to_string());
    }

    /// Snapshot of the known device list.
    pub fn devices(&self) -> DeviceList {
        self.devices.read().clone()
    }

    /// Merges a batch of remote records of one category.
    ///
    /// Unresolvable records are skipped and logged; the batch never
    /// aborts. Within the batch, at most one record per object survives:
    /// deletes beat edits, then the newest timestamp, then the
    /// lexicographically lower device id. Returns the changes actually
    /// applied.
    pub fn resolve(&self, category: Category, mut records: Vec<SyncRecord>) -> Vec<AppliedChange> {
        records.sort_by(|a, b| {
            (a.timestamp, &a.device_id, &a.object_id).cmp(&(b.timestamp, &b.device_id, &b.object_id))
        });

        let mut winners: Vec<SyncRecord> = Vec::new();
        let mut by_object: HashMap<String, usize> = HashMap::new();
        for record in records {
            if let Err(e) = record.validate() {
                warn!(category = category.name(), error = %e, "skipping unresolvable record");
                continue;
            }
            self.devices
                .write()
                .mark_seen(&record.device_id, record.timestamp);

            match by_object.get(&record.object_id) {
                None => {
                    by_object.insert(record.object_id.clone(), winners.len());
                    winners.push(record);
                }
                Some(&i) => {
                    if Self::record_beats(&record, &winners[i]) {
                        winners[i] = record;
                    }
                }
            }
        }

        let _remote = self.context.remote_origin_scope();
        let mut applied = Vec::new();
        for record in winners {
            let change = match category {
                Category::Bookmarks => self.apply_bookmark(&record),
                Category::Devices => self.apply_device(&record),
                Category::History => {
                    debug!(object_id = %record.object_id, "no local history store, skipped");
                    None
                }
            };
            applied.extend(change);
        }

        applied
    }

    /// The intra-batch conflict rule: deletes beat edits, then newer
    /// timestamps, then the lower device id.
    fn record_beats(candidate: &SyncRecord, current: &SyncRecord) -> bool {
        let candidate_deletes = candidate.action == RecordAction::Delete;
        let current_deletes = current.action == RecordAction::Delete;
        if candidate_deletes != current_deletes {
            return candidate_deletes;
        }
        if candidate.timestamp != current.timestamp {
            return candidate.timestamp > current.timestamp;
        }
        candidate.device_id < current.device_id
    }

    fn apply_bookmark(&self, record: &SyncRecord) -> Option<AppliedChange> {
        let local = self.store.get(&record.object_id);

        if record.action == RecordAction::Delete {
            // Deletes win over concurrent edits. Unknown ids still get
            // a tombstone so stale remote data cannot resurrect them.
            self.context.order_requests().cancel(&record.object_id);
            self.context.clear_local_edit(&record.object_id);
            match local {
                Some(_) => {
                    self.store
                        .tombstone(&record.object_id, record.timestamp)
                        .ok()?;
                }
                None => {
                    let mut stub = Item::new(
                        &record.object_id,
                        "",
                        Default::default(),
                        record.timestamp,
                    );
                    stub.tombstoned = true;
                    stub.last_writer = record.device_id.clone();
                    self.store.upsert(stub).ok()?;
                }
            }
            return Some(AppliedChange::Tombstoned(record.object_id.clone()));
        }

        let Some(RecordPayload::Bookmark(payload)) = &record.payload else {
            warn!(object_id = %record.object_id, "bookmark record without bookmark payload, skipped");
            return None;
        };

        match local {
            None => {
                let parent_id = self.resolve_parent(record);
                let mut item = Item::new(
                    &record.object_id,
                    parent_id,
                    payload.clone(),
                    record.timestamp,
                );
                item.order_key = record.order_key.clone();
                item.last_writer = record.device_id.clone();
                self.store.upsert(item).ok()?;
                Some(AppliedChange::Created(record.object_id.clone()))
            }
            Some(local) if local.tombstoned => {
                debug!(object_id = %record.object_id, "tombstone blocks resurrection, skipped");
                None
            }
            Some(local) => {
                if self.local_edit_wins(record) {
                    debug!(object_id = %record.object_id, "pending local edit wins, remote discarded");
                    return None;
                }
                if self.applied_state_wins(record, &local) {
                    debug!(object_id = %record.object_id, "previously applied record wins, remote discarded");
                    return None;
                }
                // Remote wins: its order key is authoritative, so the
                // pending local round trip (if any) is void.
                self.context.order_requests().cancel(&record.object_id);
                self.context.clear_local_edit(&record.object_id);

                let parent_id = self.resolve_parent(record);
                let moved = parent_id != local.parent_id;
                let item = Item {
                    object_id: local.object_id,
                    parent_id,
                    order_key: record.order_key.clone().or(local.order_key),
                    payload: payload.clone(),
                    tombstoned: false,
                    updated_at: record.timestamp,
                    last_writer: record.device_id.clone(),
                };
                self.store.upsert(item).ok()?;
                if moved {
                    Some(AppliedChange::Moved(record.object_id.clone()))
                } else {
                    Some(AppliedChange::Updated(record.object_id.clone()))
                }
            }
        }
    }

    fn apply_device(&self, record: &SyncRecord) -> Option<AppliedChange> {
        if record.action == RecordAction::Delete {
            if self.devices.write().remove(&record.object_id) {
                return Some(AppliedChange::DeviceRemoved(record.object_id.clone()));
            }
            return None;
        }
        let Some(RecordPayload::Device(payload)) = &record.payload else {
            warn!(object_id = %record.object_id, "device record without device payload, skipped");
            return None;
        };
        self.devices.write().upsert(DeviceRecord {
            device_id: record.object_id.clone(),
            display_name: payload.name.clone(),
            platform: payload.platform.clone(),
            last_seen: record.timestamp,
        });
        Some(AppliedChange::DeviceUpserted(record.object_id.clone()))
    }

    /// The conflict rule of the merge: an uncommitted local edit beats
    /// the remote record if it is newer, or on an exact timestamp tie
    /// if this device's id sorts lower than the record's origin.
    fn local_edit_wins(&self, record: &SyncRecord) -> bool {
        let Some(pending_at) = self.context.local_edit_at(&record.object_id) else {
            return false;
        };
        if pending_at != record.timestamp {
            return pending_at > record.timestamp;
        }
        match self.device_id.read().as_deref() {
            Some(own) => own < record.device_id.as_str(),
            None => false,
        }
    }

    /// Cross-batch conflict check against state a previous resolve
    /// already applied: the remote loses to a newer applied record, and
    /// at equal timestamps to an applied writer with a lower device id.
    /// Items only the host has written (`last_writer` empty) carry no
    /// remote claim, so the remote wins as before.
    fn applied_state_wins(&self, record: &SyncRecord, local: &Item) -> bool {
        if local.last_writer.is_empty() {
            return false;
        }
        if record.timestamp != local.updated_at {
            return record.timestamp < local.updated_at;
        }
        local.last_writer.as_str() < record.device_id.as_str()
    }

    /// Maps a record's parent order key to a local parent id; records
    /// whose parent is unknown land at the root.
    fn resolve_parent(&self, record: &SyncRecord) -> String {
        record
            .parent_order_key
            .as_ref()
            .and_then(|key| self.store.find_by_order_key(key))
            .map(|parent| parent.object_id)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBookmarkStore;
    use marksync_protocol::{BookmarkPayload, DevicePayload, OrderKey};

    fn key(s: &str) -> OrderKey {
        OrderKey::parse(s).unwrap()
    }

    struct Fixture {
        store: Arc<MemoryBookmarkStore>,
        context: Arc<SessionContext>,
        reconciler: RecordReconciler<MemoryBookmarkStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryBookmarkStore::new());
        let context = Arc::new(SessionContext::new());
        let reconciler = RecordReconciler::new(Arc::clone(&store), Arc::clone(&context));
        reconciler.set_identity("dev-a");
        Fixture {
            store,
            context,
            reconciler,
        }
    }

    fn bookmark(id: &str, device: &str, title: &str, order: &str, ts: u64) -> SyncRecord {
        SyncRecord::create(
            Category::Bookmarks,
            id,
            device,
            BookmarkPayload::url(title, "https://a.com"),
            ts,
        )
        .with_order(key(order), None)
    }

    #[test]
    fn unknown_object_applies_as_create() {
        let f = fixture();
        let applied = f.reconciler.resolve(
            Category::Bookmarks,
            vec![bookmark("obj-1", "dev-b", "A", "1.1.1", 100)],
        );

        assert_eq!(applied, vec![AppliedChange::Created("obj-1".into())]);
        let item = f.store.get("obj-1").unwrap();
        assert_eq!(item.payload.title, "A");
        assert_eq!(item.order_key, Some(key("1.1.1")));
    }

    #[test]
    fn batch_apply_is_idempotent() {
        let f = fixture();
        let batch = vec![
            bookmark("obj-1", "dev-b", "A", "1.1.1", 100),
            SyncRecord::delete(Category::Bookmarks, "obj-2", "dev-b", 100),
        ];

        f.reconciler.resolve(Category::Bookmarks, batch.clone());
        let first = (f.store.get("obj-1"), f.store.get("obj-2"));
        f.reconciler.resolve(Category::Bookmarks, batch);
        let second = (f.store.get("obj-1"), f.store.get("obj-2"));

        assert_eq!(first, second);
        assert!(second.1.unwrap().tombstoned);
    }

    #[test]
    fn newer_local_pending_edit_wins() {
        let f = fixture();
        f.reconciler
            .resolve(Category::Bookmarks, vec![bookmark("obj-1", "dev-b", "old", "1.1.1", 100)]);
        f.context.note_local_edit("obj-1", 200);

        let applied = f.reconciler.resolve(
            Category::Bookmarks,
            vec![bookmark("obj-1", "dev-b", "remote", "1.1.2", 150)],
        );

        assert!(applied.is_empty());
        assert_eq!(f.store.get("obj-1").unwrap().payload.title, "old");
        // The pending edit is still uncommitted.
        assert_eq!(f.context.local_edit_at("obj-1"), Some(200));
    }

    #[test]
    fn older_local_pending_edit_loses() {
        let f = fixture();
        f.reconciler
            .resolve(Category::Bookmarks, vec![bookmark("obj-1", "dev-b", "old", "1.1.1", 100)]);
        f.context.note_local_edit("obj-1", 120);

        let applied = f.reconciler.resolve(
            Category::Bookmarks,
            vec![bookmark("obj-1", "dev-b", "remote", "1.1.2", 150)],
        );

        assert_eq!(applied, vec![AppliedChange::Updated("obj-1".into())]);
        assert_eq!(f.store.get("obj-1").unwrap().payload.title, "remote");
        assert!(f.context.local_edit_at("obj-1").is_none());
    }

    #[test]
    fn equal_timestamp_tie_breaks_on_lower_device_id() {
        // Our device is "dev-a". Against a record from "dev-b" at the
        // same timestamp, the lower id (ours) wins.
        let f = fixture();
        f.reconciler
            .resolve(Category::Bookmarks, vec![bookmark("obj-1", "dev-b", "old", "1.1.1", 100)]);
        f.context.note_local_edit("obj-1", 200);
        let applied = f.reconciler.resolve(
            Category::Bookmarks,
            vec![bookmark("obj-1", "dev-b", "remote", "1.1.2", 200)],
        );
        assert!(applied.is_empty());
        assert_eq!(f.store.get("obj-1").unwrap().payload.title, "old");

        // Flip the identities: a lower remote id wins the tie.
        let f = fixture();
        f.reconciler.set_identity("dev-z");
        f.reconciler
            .resolve(Category::Bookmarks, vec![bookmark("obj-1", "dev-b", "old", "1.1.1", 100)]);
        f.context.note_local_edit("obj-1", 200);
        let applied = f.reconciler.resolve(
            Category::Bookmarks,
            vec![bookmark("obj-1", "dev-b", "remote", "1.1.2", 200)],
        );
        assert_eq!(applied, vec![AppliedChange::Updated("obj-1".into())]);
        assert_eq!(f.store.get("obj-1").unwrap().payload.title, "remote");
    }

    #[test]
    fn batch_order_does_not_change_outcome() {
        let a = bookmark("obj-1", "dev-a", "from-a", "1.1.1", 100);
        let b = bookmark("obj-1", "dev-b", "from-b", "1.1.2", 100);

        let f1 = fixture();
        f1.reconciler
            .resolve(Category::Bookmarks, vec![a.clone(), b.clone()]);
        let f2 = fixture();
        f2.reconciler.resolve(Category::Bookmarks, vec![b, a]);

        // Equal timestamps: the lower device id wins in both arrival
        // orders.
        assert_eq!(f1.store.get("obj-1").unwrap().payload.title, "from-a");
        assert_eq!(
            f1.store.get("obj-1").unwrap(),
            f2.store.get("obj-1").unwrap()
        );
    }

    #[test]
    fn equal_timestamp_conflict_resolves_to_lower_device_id_across_batches() {
        // Same conflict as above, but the records arrive in separate
        // batches. Whoever lands first, dev-a's payload must survive.
        let f = fixture();
        f.reconciler
            .resolve(Category::Bookmarks, vec![bookmark("obj-1", "dev-b", "from-b", "1.1.2", 100)]);
        f.reconciler
            .resolve(Category::Bookmarks, vec![bookmark("obj-1", "dev-a", "from-a", "1.1.1", 100)]);
        assert_eq!(f.store.get("obj-1").unwrap().payload.title, "from-a");

        // A re-delivery of the losing record cannot steal the win back.
        let applied = f.reconciler.resolve(
            Category::Bookmarks,
            vec![bookmark("obj-1", "dev-b", "from-b", "1.1.2", 100)],
        );
        assert!(applied.is_empty());
        assert_eq!(f.store.get("obj-1").unwrap().payload.title, "from-a");
    }

    #[test]
    fn stale_remote_record_cannot_overwrite_newer_applied_state() {
        let f = fixture();
        f.reconciler
            .resolve(Category::Bookmarks, vec![bookmark("obj-1", "dev-b", "new", "1.1.2", 200)]);

        let applied = f.reconciler.resolve(
            Category::Bookmarks,
            vec![bookmark("obj-1", "dev-c", "old", "1.1.1", 100)],
        );
        assert!(applied.is_empty());
        let item = f.store.get("obj-1").unwrap();
        assert_eq!(item.payload.title, "new");
        assert_eq!(item.order_key, Some(key("1.1.2")));
    }

    #[test]
    fn equal_timestamp_delete_beats_edit_within_a_batch() {
        let f = fixture();
        f.reconciler.resolve(
            Category::Bookmarks,
            vec![
                bookmark("obj-1", "dev-a", "edit", "1.1.1", 100),
                SyncRecord::delete(Category::Bookmarks, "obj-1", "dev-z", 100),
            ],
        );
        assert!(f.store.get("obj-1").unwrap().tombstoned);
    }

    #[test]
    fn delete_wins_over_pending_local_edit() {
        let f = fixture();
        f.reconciler
            .resolve(Category::Bookmarks, vec![bookmark("obj-1", "dev-b", "A", "1.1.1", 100)]);
        // Pending local update, newer than the incoming delete.
        f.context.note_local_edit("obj-1", 500);

        let applied = f.reconciler.resolve(
            Category::Bookmarks,
            vec![SyncRecord::delete(Category::Bookmarks, "obj-1", "dev-b", 300)],
        );

        assert_eq!(applied, vec![AppliedChange::Tombstoned("obj-1".into())]);
        assert!(f.store.get("obj-1").unwrap().tombstoned);
        assert!(f.context.local_edit_at("obj-1").is_none());
        assert!(f.store.active_children("").is_empty());
    }

    #[test]
    fn delete_for_unknown_object_leaves_tombstone() {
        let f = fixture();
        f.reconciler.resolve(
            Category::Bookmarks,
            vec![SyncRecord::delete(Category::Bookmarks, "ghost", "dev-b", 100)],
        );

        let stub = f.store.get("ghost").unwrap();
        assert!(stub.tombstoned);

        // A stale create afterwards cannot resurrect it.
        let applied = f.reconciler.resolve(
            Category::Bookmarks,
            vec![bookmark("ghost", "dev-b", "back", "1.1.1", 50)],
        );
        assert!(applied.is_empty());
        assert!(f.store.get("ghost").unwrap().tombstoned);
    }

    #[test]
    fn parent_order_mismatch_is_a_move() {
        let f = fixture();
        // Two folders and a bookmark under the first.
        let mut folder_a = Item::new("folder-a", "", BookmarkPayload::folder("A"), 0);
        folder_a.order_key = Some(key("1.1"));
        f.store.upsert(folder_a).unwrap();
        let mut folder_b = Item::new("folder-b", "", BookmarkPayload::folder("B"), 0);
        folder_b.order_key = Some(key("1.2"));
        f.store.upsert(folder_b).unwrap();
        let mut child = Item::new("child", "folder-a", BookmarkPayload::url("c", "https://c"), 0);
        child.order_key = Some(key("1.1.1"));
        f.store.upsert(child).unwrap();

        // Remote record re-slots the child under folder-b, carrying
        // the new order key verbatim.
        let record = SyncRecord::update(
            Category::Bookmarks,
            "child",
            "dev-b",
            BookmarkPayload::url("c", "https://c"),
            100,
        )
        .with_order(key("1.2.1"), Some(key("1.2")));

        let applied = f.reconciler.resolve(Category::Bookmarks, vec![record]);

        assert_eq!(applied, vec![AppliedChange::Moved("child".into())]);
        let child = f.store.get("child").unwrap();
        assert_eq!(child.parent_id, "folder-b");
        assert_eq!(child.order_key, Some(key("1.2.1")));
    }

    #[test]
    fn malformed_records_are_skipped_not_fatal() {
        let f = fixture();
        let mut bad = bookmark("", "dev-b", "A", "1.1.1", 100);
        bad.object_id.clear();
        let good = bookmark("obj-1", "dev-b", "B", "1.1.2", 100);

        let applied = f
            .reconciler
            .resolve(Category::Bookmarks, vec![bad, good]);

        assert_eq!(applied, vec![AppliedChange::Created("obj-1".into())]);
    }

    #[test]
    fn device_records_maintain_the_list() {
        let f = fixture();
        let create = SyncRecord::create(
            Category::Devices,
            "dev-b",
            "dev-b",
            DevicePayload {
                name: "phone".into(),
                platform: "android".into(),
            },
            100,
        );
        let applied = f.reconciler.resolve(Category::Devices, vec![create]);
        assert_eq!(applied, vec![AppliedChange::DeviceUpserted("dev-b".into())]);
        assert_eq!(f.reconciler.devices().get("dev-b").unwrap().display_name, "phone");

        let delete = SyncRecord::delete(Category::Devices, "dev-b", "dev-b", 200);
        let applied = f.reconciler.resolve(Category::Devices, vec![delete]);
        assert_eq!(applied, vec![AppliedChange::DeviceRemoved("dev-b".into())]);
        assert!(f.reconciler.devices().is_empty());
    }

    #[test]
    fn history_records_are_skipped() {
        let f = fixture();
        let record = SyncRecord::create(
            Category::History,
            "visit-1",
            "dev-b",
            BookmarkPayload::url("A", "https://a.com"),
            100,
        );
        assert!(f.reconciler.resolve(Category::History, vec![record]).is_empty());
    }

    #[test]
    fn applies_run_inside_remote_origin_scope() {
        // Indirectly visible: a resolve does not disturb the flag
        // outside its own scope.
        let f = fixture();
        assert!(!f.context.is_remote_origin());
        f.reconciler.resolve(
            Category::Bookmarks,
            vec![bookmark("obj-1", "dev-b", "A", "1.1.1", 100)],
        );
        assert!(!f.context.is_remote_origin());
    }
}
