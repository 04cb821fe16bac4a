//! Local mutation processing.
//!
//! Translates local store mutation notifications into outgoing records:
//! each add/move requests an order key through the transport, and the
//! completion callback commits the key and emits exactly one record.
//! Notifications raised while a remote-originated apply is in progress
//! are suppressed so reconciled records never echo back out.

use crate::client::SyncClient;
use crate::context::SessionContext;
use crate::store::{BookmarkStore, Item};
use marksync_protocol::{Category, OrderKey, RecordAction, SyncRecord};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A local mutation observed before the base order key arrived,
/// replayed verbatim once it does.
#[derive(Debug, Clone)]
enum DeferredMutation {
    Added {
        object_id: String,
    },
    Moved {
        object_id: String,
        new_prev: Option<OrderKey>,
        new_next: Option<OrderKey>,
    },
}

impl DeferredMutation {
    fn object_id(&self) -> &str {
        match self {
            DeferredMutation::Added { object_id } => object_id,
            DeferredMutation::Moved { object_id, .. } => object_id,
        }
    }
}

/// Turns local bookmark mutations into outgoing sync records.
pub struct ChangeProcessor<C: SyncClient, S: BookmarkStore> {
    client: Arc<C>,
    store: Arc<S>,
    context: Arc<SessionContext>,
    platform: String,
    device_id: RwLock<Option<String>>,
    base_order: RwLock<Option<OrderKey>>,
    /// Mutations observed before the base order key arrived; drained
    /// once it does. One entry per object, newest mutation wins.
    deferred: Mutex<Vec<DeferredMutation>>,
}

impl<C: SyncClient, S: BookmarkStore> ChangeProcessor<C, S> {
    /// Creates a processor bound to a client, store, and session context.
    pub fn new(
        client: Arc<C>,
        store: Arc<S>,
        context: Arc<SessionContext>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            client,
            store,
            context,
            platform: platform.into(),
            device_id: RwLock::new(None),
            base_order: RwLock::new(None),
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// Sets this device's identity once configuration establishes it.
    pub fn set_identity(&self, device_id: &str) {
        *self.device_id.write() = Some(device_id.to_string());
    }

    /// The device-scoped base order key, if already known.
    pub fn base_order(&self) -> Option<OrderKey> {
        self.base_order.read().clone()
    }

    /// Completion of the base order round trip; replays deferred
    /// mutations with their original action and neighborhood.
    pub fn on_base_order_saved(&self, order: OrderKey) {
        *self.base_order.write() = Some(order);
        let deferred: Vec<DeferredMutation> = std::mem::take(&mut *self.deferred.lock());
        for mutation in deferred {
            // Re-read the item; the host may have mutated it meanwhile.
            let Some(item) = self.store.get(mutation.object_id()) else {
                continue;
            };
            if item.tombstoned {
                continue;
            }
            match mutation {
                DeferredMutation::Added { .. } => self.on_local_item_added(&item),
                DeferredMutation::Moved {
                    new_prev, new_next, ..
                } => self.on_local_item_moved(&item, new_prev.as_ref(), new_next.as_ref()),
            }
        }
    }

    /// A bookmark was added locally.
    ///
    /// Requests an order key placing the item after its last ordered
    /// sibling; the record is emitted from [`Self::on_order_saved`].
    pub fn on_local_item_added(&self, item: &Item) {
        if self.context.is_remote_origin() {
            return;
        }
        let Some(parent) = self.parent_order(item) else {
            self.defer(DeferredMutation::Added {
                object_id: item.object_id.clone(),
            });
            return;
        };
        let prev = self
            .store
            .active_children(&item.parent_id)
            .into_iter()
            .filter(|sibling| sibling.object_id != item.object_id)
            .filter_map(|sibling| sibling.order_key)
            .max();
        self.request_order(item, RecordAction::Create, prev, None, parent);
    }

    /// A bookmark was moved locally to sit between two siblings.
    pub fn on_local_item_moved(
        &self,
        item: &Item,
        new_prev: Option<&OrderKey>,
        new_next: Option<&OrderKey>,
    ) {
        if self.context.is_remote_origin() {
            return;
        }
        let Some(parent) = self.parent_order(item) else {
            self.defer(DeferredMutation::Moved {
                object_id: item.object_id.clone(),
                new_prev: new_prev.cloned(),
                new_next: new_next.cloned(),
            });
            return;
        };
        self.request_order(
            item,
            RecordAction::Update,
            new_prev.cloned(),
            new_next.cloned(),
            parent,
        );
    }

    /// A bookmark was removed locally. Tombstones the item and emits a
    /// DELETE record immediately; no order key is needed.
    pub fn on_local_item_removed(&self, item: &Item) {
        if self.context.is_remote_origin() {
            return;
        }
        let Some(device_id) = self.device_id.read().clone() else {
            debug!(object_id = %item.object_id, "dropping removal before identity is set");
            return;
        };
        let timestamp = now_ms();
        if self.store.tombstone(&item.object_id, timestamp).is_err() {
            return;
        }
        self.context.order_requests().cancel(&item.object_id);
        self.context.clear_local_edit(&item.object_id);

        let record =
            SyncRecord::delete(Category::Bookmarks, &item.object_id, device_id, timestamp);
        self.client.send_sync_records(Category::Bookmarks, &[record]);
    }

    /// Completion of an order-key round trip.
    ///
    /// Commits the key to the requesting item and emits its record,
    /// unless the request was superseded, the session generation moved
    /// on, or the item was tombstoned in the meantime.
    pub fn on_order_saved(
        &self,
        order: OrderKey,
        prev: Option<&OrderKey>,
        next: Option<&OrderKey>,
        parent: &OrderKey,
    ) {
        let Some(request) = self.context.order_requests().pop_matching(prev, next, parent)
        else {
            debug!(%order, "order completion without a matching request, dropped");
            return;
        };
        if request.generation != self.context.generation() {
            debug!(
                got = request.generation,
                current = self.context.generation(),
                "stale order completion, dropped"
            );
            return;
        }
        let Some(item) = self.store.get(&request.object_id) else {
            return;
        };
        if item.tombstoned {
            self.context.clear_local_edit(&request.object_id);
            return;
        }
        let Some(device_id) = self.device_id.read().clone() else {
            return;
        };
        if self
            .store
            .set_order_key(&request.object_id, order.clone())
            .is_err()
        {
            return;
        }

        let record = SyncRecord {
            category: Category::Bookmarks,
            action: request.action,
            object_id: request.object_id.clone(),
            device_id,
            order_key: Some(order),
            parent_order_key: Some(request.parent.clone()),
            payload: Some(item.payload.clone().into()),
            timestamp: now_ms(),
        };
        self.client.send_sync_records(Category::Bookmarks, &[record]);
        self.context.clear_local_edit(&request.object_id);
    }

    /// Drops deferred adds; pending requests are cleared with the
    /// session generation.
    pub fn cancel_all(&self) {
        self.deferred.lock().clear();
    }

    fn request_order(
        &self,
        item: &Item,
        action: RecordAction,
        prev: Option<OrderKey>,
        next: Option<OrderKey>,
        parent: OrderKey,
    ) {
        self.context.order_requests().push(
            self.context.generation(),
            &item.object_id,
            action,
            prev.clone(),
            next.clone(),
            parent.clone(),
        );
        self.context.note_local_edit(&item.object_id, now_ms());
        self.client
            .send_get_bookmark_order(prev.as_ref(), next.as_ref(), &parent);
    }

    /// The order key scoping `item`'s siblings: the parent item's key
    /// for nested nodes, the device base order at the top level.
    fn parent_order(&self, item: &Item) -> Option<OrderKey> {
        if !item.parent_id.is_empty() {
            if let Some(key) = self.store.get(&item.parent_id).and_then(|p| p.order_key) {
                return Some(key);
            }
        }
        self.base_order.read().clone()
    }

    fn defer(&self, mutation: DeferredMutation) {
        debug!(object_id = mutation.object_id(), "no base order yet, deferring");
        let mut deferred = self.deferred.lock();
        deferred.retain(|pending| pending.object_id() != mutation.object_id());
        deferred.push(mutation);
        if let Some(device_id) = self.device_id.read().clone() {
            self.client
                .send_get_bookmarks_base_order(&device_id, &self.platform);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientCall, MockSyncClient};
    use crate::store::MemoryBookmarkStore;
    use marksync_protocol::BookmarkPayload;

    fn key(s: &str) -> OrderKey {
        OrderKey::parse(s).unwrap()
    }

    struct Fixture {
        client: Arc<MockSyncClient>,
        store: Arc<MemoryBookmarkStore>,
        context: Arc<SessionContext>,
        processor: ChangeProcessor<MockSyncClient, MemoryBookmarkStore>,
    }

    fn fixture() -> Fixture {
        let client = Arc::new(MockSyncClient::new());
        let store = Arc::new(MemoryBookmarkStore::new());
        let context = Arc::new(SessionContext::new());
        let processor = ChangeProcessor::new(
            Arc::clone(&client),
            Arc::clone(&store),
            Arc::clone(&context),
            "linux",
        );
        processor.set_identity("dev-a");
        processor.on_base_order_saved(key("1.0"));
        Fixture {
            client,
            store,
            context,
            processor,
        }
    }

    fn add_item(f: &Fixture, id: &str, order: Option<&str>) -> Item {
        let mut item = Item::new(id, "", BookmarkPayload::url(id, "https://a.com"), 0);
        item.order_key = order.map(key);
        f.store.upsert(item.clone()).unwrap();
        item
    }

    #[test]
    fn add_requests_order_after_last_sibling() {
        let f = fixture();
        add_item(&f, "existing", Some("1.0.2"));
        let item = add_item(&f, "new", None);

        f.processor.on_local_item_added(&item);

        let requests = f.client.order_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0], (Some(key("1.0.2")), None, key("1.0")));
        // No record yet; it is emitted on completion.
        assert!(f.client.sent_records().is_empty());
    }

    #[test]
    fn order_completion_emits_exactly_one_create() {
        let f = fixture();
        add_item(&f, "existing", Some("1.0.2"));
        let item = add_item(&f, "new", None);
        f.processor.on_local_item_added(&item);

        f.processor
            .on_order_saved(key("1.0.3"), Some(&key("1.0.2")), None, &key("1.0"));

        let sent = f.client.sent_records();
        assert_eq!(sent.len(), 1);
        let record = &sent[0].1;
        assert_eq!(record.action, RecordAction::Create);
        assert_eq!(record.object_id, "new");
        assert_eq!(record.order_key, Some(key("1.0.3")));
        assert_eq!(f.store.get("new").unwrap().order_key, Some(key("1.0.3")));
        // The pending edit was committed.
        assert!(f.context.local_edit_at("new").is_none());

        // A duplicate completion finds no pending request and is dropped.
        f.processor
            .on_order_saved(key("1.0.3"), Some(&key("1.0.2")), None, &key("1.0"));
        assert_eq!(f.client.sent_records().len(), 1);
    }

    #[test]
    fn move_uses_given_neighbors_and_emits_update() {
        let f = fixture();
        let item = add_item(&f, "moved", Some("1.0.5"));

        f.processor
            .on_local_item_moved(&item, Some(&key("1.0.1")), Some(&key("1.0.2")));
        f.processor.on_order_saved(
            key("1.0.1.1"),
            Some(&key("1.0.1")),
            Some(&key("1.0.2")),
            &key("1.0"),
        );

        let sent = f.client.sent_records();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.action, RecordAction::Update);
        assert_eq!(f.store.get("moved").unwrap().order_key, Some(key("1.0.1.1")));
    }

    #[test]
    fn new_mutation_supersedes_pending_request() {
        let f = fixture();
        let item = add_item(&f, "obj", Some("1.0.5"));

        f.processor.on_local_item_added(&item);
        f.processor
            .on_local_item_moved(&item, Some(&key("1.0.1")), None);

        // The superseded add completion is dropped.
        f.processor.on_order_saved(key("1.0.6"), None, None, &key("1.0"));
        assert!(f.client.sent_records().is_empty());

        // The move completion still lands.
        f.processor
            .on_order_saved(key("1.0.1.1"), Some(&key("1.0.1")), None, &key("1.0"));
        assert_eq!(f.client.sent_records().len(), 1);
    }

    #[test]
    fn removal_tombstones_and_sends_delete() {
        let f = fixture();
        let item = add_item(&f, "gone", Some("1.0.1"));

        f.processor.on_local_item_removed(&item);

        assert!(f.store.get("gone").unwrap().tombstoned);
        let sent = f.client.sent_records();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.action, RecordAction::Delete);

        // A late order completion for the tombstoned item emits nothing.
        f.processor.on_order_saved(key("1.0.9"), None, None, &key("1.0"));
        assert_eq!(f.client.sent_records().len(), 1);
    }

    #[test]
    fn remote_origin_suppresses_everything() {
        let f = fixture();
        let item = add_item(&f, "remote", None);

        let _guard = f.context.remote_origin_scope();
        f.processor.on_local_item_added(&item);
        f.processor.on_local_item_removed(&item);

        assert!(f.client.order_requests().is_empty());
        assert!(f.client.sent_records().is_empty());
        assert!(!f.store.get("remote").unwrap().tombstoned);
    }

    #[test]
    fn stale_generation_completion_is_dropped() {
        let f = fixture();
        let item = add_item(&f, "obj", None);
        f.processor.on_local_item_added(&item);

        // Requests issued before the bump are cleared with it, so the
        // completion finds nothing to commit.
        f.context.bump_generation();
        f.processor.on_order_saved(key("1.0.1"), None, None, &key("1.0"));
        assert!(f.client.sent_records().is_empty());
    }

    #[test]
    fn add_without_base_order_defers_until_it_arrives() {
        let client = Arc::new(MockSyncClient::new());
        let store = Arc::new(MemoryBookmarkStore::new());
        let context = Arc::new(SessionContext::new());
        let processor = ChangeProcessor::new(
            Arc::clone(&client),
            Arc::clone(&store),
            Arc::clone(&context),
            "linux",
        );
        processor.set_identity("dev-a");

        let item = Item::new("first", "", BookmarkPayload::url("first", "https://a.com"), 0);
        store.upsert(item.clone()).unwrap();
        processor.on_local_item_added(&item);

        // No order request yet; a base order request went out instead.
        assert!(client.order_requests().is_empty());
        assert_eq!(
            client.count(|c| matches!(c, ClientCall::GetBaseOrder { .. })),
            1
        );

        processor.on_base_order_saved(key("1.0"));
        let requests = client.order_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0], (None, None, key("1.0")));
    }

    #[test]
    fn move_without_base_order_replays_as_move() {
        let client = Arc::new(MockSyncClient::new());
        let store = Arc::new(MemoryBookmarkStore::new());
        let context = Arc::new(SessionContext::new());
        let processor = ChangeProcessor::new(
            Arc::clone(&client),
            Arc::clone(&store),
            Arc::clone(&context),
            "linux",
        );
        processor.set_identity("dev-a");

        let mut item = Item::new("obj", "", BookmarkPayload::url("obj", "https://a.com"), 0);
        item.order_key = Some(key("1.0.5"));
        store.upsert(item.clone()).unwrap();
        processor.on_local_item_moved(&item, Some(&key("1.0.1")), Some(&key("1.0.2")));
        assert!(client.order_requests().is_empty());

        // The replayed request keeps the caller's neighborhood, and its
        // completion commits as an update, not a create.
        processor.on_base_order_saved(key("1.0"));
        let requests = client.order_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0],
            (Some(key("1.0.1")), Some(key("1.0.2")), key("1.0"))
        );

        processor.on_order_saved(
            key("1.0.1.1"),
            Some(&key("1.0.1")),
            Some(&key("1.0.2")),
            &key("1.0"),
        );
        let sent = client.sent_records();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.action, RecordAction::Update);
        assert_eq!(store.get("obj").unwrap().order_key, Some(key("1.0.1.1")));
    }

    #[test]
    fn latest_deferred_mutation_per_object_wins() {
        let client = Arc::new(MockSyncClient::new());
        let store = Arc::new(MemoryBookmarkStore::new());
        let context = Arc::new(SessionContext::new());
        let processor = ChangeProcessor::new(
            Arc::clone(&client),
            Arc::clone(&store),
            Arc::clone(&context),
            "linux",
        );
        processor.set_identity("dev-a");

        let item = Item::new("obj", "", BookmarkPayload::url("obj", "https://a.com"), 0);
        store.upsert(item.clone()).unwrap();
        processor.on_local_item_added(&item);
        processor.on_local_item_moved(&item, Some(&key("1.0.1")), None);

        processor.on_base_order_saved(key("1.0"));
        let requests = client.order_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0], (Some(key("1.0.1")), None, key("1.0")));
    }
}
