//! Sync service wiring.
//!
//! `SyncService` owns one session: the state machine, change processor,
//! and reconciler share a [`SessionContext`], and every inbound
//! transport callback enters here. Callbacks arriving after a disable
//! are dropped; the generation bump already cleared any pending work
//! they could have matched.

use crate::change_processor::ChangeProcessor;
use crate::client::{ClientConfig, ResolveCandidate, SyncClient};
use crate::config::SyncConfig;
use crate::context::SessionContext;
use crate::error::{SyncError, SyncResult};
use crate::prefs::{Seed, SyncPrefs};
use crate::reconciler::{AppliedChange, RecordReconciler};
use crate::session::{ObserverHandle, SessionState, StateMachine, SyncObserver, SyncSessionState};
use crate::store::{BookmarkStore, Item};
use marksync_protocol::{Category, DeviceList, OrderKey, SyncRecord};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// The reconciliation core of one sync session.
pub struct SyncService<C: SyncClient, S: BookmarkStore, P: SyncPrefs> {
    config: SyncConfig,
    client: Arc<C>,
    store: Arc<S>,
    prefs: Arc<P>,
    context: Arc<SessionContext>,
    machine: StateMachine,
    processor: ChangeProcessor<C, S>,
    reconciler: RecordReconciler<S>,
    /// Generation the most recent outbound fetch was issued under.
    /// Fetch and resolve responses arriving under a different current
    /// generation predate an enable/disable transition and are dropped.
    fetch_generation: AtomicU64,
}

impl<C: SyncClient, S: BookmarkStore, P: SyncPrefs> SyncService<C, S, P> {
    /// Creates a service over the host-provided boundaries.
    pub fn new(config: SyncConfig, client: Arc<C>, store: Arc<S>, prefs: Arc<P>) -> Self {
        let context = Arc::new(SessionContext::new());
        let machine = StateMachine::new(Arc::clone(&context));
        let processor = ChangeProcessor::new(
            Arc::clone(&client),
            Arc::clone(&store),
            Arc::clone(&context),
            config.platform.clone(),
        );
        let reconciler = RecordReconciler::new(Arc::clone(&store), Arc::clone(&context));
        if let Some(device_id) = prefs.device_id() {
            processor.set_identity(&device_id);
            reconciler.set_identity(&device_id);
        }
        Self {
            config,
            client,
            store,
            prefs,
            context,
            machine,
            processor,
            reconciler,
            fetch_generation: AtomicU64::new(0),
        }
    }

    /// Registers a session observer.
    pub fn add_observer(&self, observer: Arc<dyn SyncObserver>) -> ObserverHandle {
        self.machine.add_observer(observer)
    }

    /// Removes a session observer.
    pub fn remove_observer(&self, handle: ObserverHandle) {
        self.machine.remove_observer(handle)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    /// Current session snapshot.
    pub fn session(&self) -> SyncSessionState {
        self.machine.session()
    }

    /// True once device identity and seed are established.
    pub fn is_configured(&self) -> bool {
        self.machine.is_configured()
    }

    /// True once one full fetch-resolve cycle has completed.
    pub fn is_initialized(&self) -> bool {
        self.machine.is_initialized()
    }

    /// Snapshot of the synced device list.
    pub fn devices(&self) -> DeviceList {
        self.reconciler.devices()
    }

    /// Enables or disables sync, persisting the flag. Enabling an
    /// already-enabled session is a no-op.
    pub fn set_enabled(&self, enabled: bool) {
        if !self.machine.set_enabled(enabled) {
            return;
        }
        self.prefs.set_enabled(enabled);
        if !enabled {
            self.processor.cancel_all();
        }
        self.client.on_sync_enabled_changed();
    }

    /// Starts sync as the first device of a new chain.
    ///
    /// Enables the session if needed, stores the device name, and asks
    /// the transport for key material; identity arrives back through
    /// [`Self::on_got_init_data`].
    pub fn setup_new_to_sync(&self, device_name: &str) -> SyncResult<()> {
        if self.machine.state() == SessionState::Disabled {
            self.set_enabled(true);
        }
        self.prefs.set_device_name(device_name);
        self.machine.setup_complete()?;
        self.client.need_sync_words(self.prefs.seed().as_ref());
        Ok(())
    }

    /// Joins an existing chain from a word phrase. Setup completes when
    /// the transport returns the derived seed bytes.
    pub fn setup_from_sync_words(&self, device_name: &str, words: &str) {
        if self.machine.state() == SessionState::Disabled {
            self.set_enabled(true);
        }
        self.prefs.set_device_name(device_name);
        self.client.need_bytes_from_sync_words(words);
    }

    /// Leaves the sync chain: deletes this user server-side, clears
    /// persisted identity, and disables the session.
    pub fn reset_sync(&self) {
        self.client.send_delete_sync_user();
        self.prefs.clear();
        self.set_enabled(false);
    }

    /// Purges a category server-side; bookmark tombstones are erased
    /// with it.
    pub fn delete_category(&self, category: Category) {
        self.client.send_delete_sync_category(category);
        if category == Category::Bookmarks {
            self.store.purge_tombstones();
        }
    }

    /// The host's background timer started: `Idle` → `Running`.
    pub fn background_sync_started(&self) {
        self.machine.background_sync_started();
    }

    /// The host's background timer stopped: `Running` → `Idle`.
    pub fn background_sync_stopped(&self) {
        self.machine.background_sync_stopped();
    }

    /// One tick of the background poll. No-op unless `Running`.
    pub fn poll_tick(&self) {
        if !self.machine.state().is_running() {
            return;
        }
        self.fetch_generation
            .store(self.context.generation(), Ordering::SeqCst);
        self.client.send_fetch_sync_devices();
        for category in Category::all() {
            self.client.send_fetch_sync_records(
                &[category],
                self.prefs.last_fetch(category),
                self.config.fetch_batch_size,
            );
        }
    }

    /// Guard shared by the fetch/resolve inbound callbacks: a response
    /// must arrive in an enabled session, under the generation its
    /// fetch was issued in.
    fn check_fetch_response(&self, category: Category) -> SyncResult<()> {
        if !self.machine.state().is_enabled() {
            debug!(category = category.name(), "fetch response after disable, dropped");
            return Err(SyncError::NotConfigured);
        }
        let got = self.fetch_generation.load(Ordering::SeqCst);
        let current = self.context.generation();
        if got != current {
            debug!(
                category = category.name(),
                got, current, "fetch response from a previous session, dropped"
            );
            return Err(SyncError::StaleGeneration { got, current });
        }
        Ok(())
    }

    // --- Local mutation notifications from the host -----------------

    /// A bookmark was added locally.
    pub fn bookmark_added(&self, item: &Item) -> SyncResult<()> {
        if !self.machine.is_configured() {
            return Err(SyncError::NotConfigured);
        }
        self.processor.on_local_item_added(item);
        Ok(())
    }

    /// A bookmark was moved locally between two siblings.
    pub fn bookmark_moved(
        &self,
        item: &Item,
        new_prev: Option<&OrderKey>,
        new_next: Option<&OrderKey>,
    ) -> SyncResult<()> {
        if !self.machine.is_configured() {
            return Err(SyncError::NotConfigured);
        }
        self.processor.on_local_item_moved(item, new_prev, new_next);
        Ok(())
    }

    /// A bookmark was removed locally.
    pub fn bookmark_removed(&self, item: &Item) -> SyncResult<()> {
        if !self.machine.is_configured() {
            return Err(SyncError::NotConfigured);
        }
        self.processor.on_local_item_removed(item);
        Ok(())
    }

    // --- Inbound callbacks from the transport -----------------------

    /// The transport is ready. Acknowledged to the client; a configured
    /// session starts its background poll immediately.
    pub fn on_sync_ready(&self) {
        self.client.on_extension_initialized();
        if self.machine.is_configured() {
            self.machine.background_sync_started();
            self.poll_tick();
        }
    }

    /// Identity established by the transport (seed and device id).
    pub fn on_got_init_data(&self, seed: Option<Seed>, device_id: &str) {
        if !self.machine.state().is_enabled() {
            debug!("init data after disable, dropped");
            return;
        }
        if let Some(seed) = seed {
            self.prefs.set_seed(seed);
        }
        self.prefs.set_device_id(device_id);
        self.processor.set_identity(device_id);
        self.reconciler.set_identity(device_id);

        let client_config = ClientConfig {
            api_version: self.config.api_version.clone(),
            server_url: self.config.server_url.clone(),
        };
        self.client.send_got_init_data(
            self.prefs.seed().as_ref(),
            Some(device_id),
            &client_config,
            "",
        );
        self.client
            .send_get_bookmarks_base_order(device_id, &self.config.platform);
    }

    /// The transport derived seed bytes from a word phrase.
    pub fn on_words_to_bytes_done(&self, bytes: Vec<u8>) {
        if !self.machine.state().is_enabled() {
            debug!("seed bytes after disable, dropped");
            return;
        }
        self.prefs.set_seed(Seed::new(bytes));
        if self.machine.state() == SessionState::Configuring {
            // Joining an existing chain completes setup here.
            let _ = self.machine.setup_complete();
        }
    }

    /// The transport rendered the sync phrase.
    pub fn on_have_sync_words(&self, words: &str) {
        self.machine.notify_have_words(words);
    }

    /// Completion of the base order round trip.
    pub fn on_save_bookmarks_base_order(&self, order: OrderKey) {
        if !self.machine.state().is_enabled() {
            return;
        }
        self.processor.on_base_order_saved(order);
    }

    /// Completion of an order-key round trip.
    pub fn on_save_bookmark_order(
        &self,
        order: OrderKey,
        prev: Option<&OrderKey>,
        next: Option<&OrderKey>,
        parent: &OrderKey,
    ) {
        if !self.machine.state().is_enabled() {
            return;
        }
        self.processor.on_order_saved(order, prev, next, parent);
    }

    /// Fetched records arrived; pairs them with local state and hands
    /// the candidates back for resolution. Responses from before the
    /// most recent enable/disable transition are dropped.
    pub fn on_fetched_sync_records(
        &self,
        category: Category,
        records: Vec<SyncRecord>,
    ) -> SyncResult<()> {
        self.check_fetch_response(category)?;
        let device_id = self.prefs.device_id().unwrap_or_default();
        let candidates: Vec<ResolveCandidate> = records
            .into_iter()
            .map(|record| {
                let local = self.store.get(&record.object_id).map(|item| {
                    let parent_order = self
                        .store
                        .get(&item.parent_id)
                        .and_then(|parent| parent.order_key);
                    item.to_record(&device_id, parent_order)
                });
                ResolveCandidate { record, local }
            })
            .collect();
        self.client.send_resolve_sync_records(category, &candidates);
        Ok(())
    }

    /// Resolved records arrived; merges them and advances the fetch
    /// cursor. Completing the bookmarks category for the first time
    /// marks the session initialized. Responses from before the most
    /// recent enable/disable transition are dropped.
    pub fn on_resolved_sync_records(
        &self,
        category: Category,
        records: Vec<SyncRecord>,
    ) -> SyncResult<Vec<AppliedChange>> {
        self.check_fetch_response(category)?;
        let max_timestamp = records.iter().map(|r| r.timestamp).max();
        let applied = self.reconciler.resolve(category, records);

        if let Some(timestamp) = max_timestamp {
            if timestamp > self.prefs.last_fetch(category) {
                self.prefs.set_last_fetch(category, timestamp);
            }
        }
        if !applied.is_empty() {
            self.machine.notify_log(&format!(
                "{}: applied {} remote changes",
                category.name(),
                applied.len()
            ));
        }
        if category == Category::Bookmarks {
            self.machine.mark_initialized();
        }
        Ok(applied)
    }

    /// A transport failure was reported. Retryable errors are logged
    /// and left to the next poll tick; non-retryable ones put the
    /// session into the `Error` state.
    pub fn on_transport_error(&self, error: SyncError) {
        self.machine.notify_log(&error.to_string());
        if error.is_retryable() {
            warn!(%error, "transport error, will retry on next poll");
            return;
        }
        self.machine.mark_error();
    }

    /// The shared session context (generation, suppression, pending
    /// work). Exposed for embedders that drive components directly.
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }
}
