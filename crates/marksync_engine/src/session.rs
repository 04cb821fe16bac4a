//! Session lifecycle state machine.

use crate::context::SessionContext;
use crate::error::{SyncError, SyncResult};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Lifecycle state of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Sync is off.
    Disabled,
    /// Enabled, awaiting seed/device setup.
    Configuring,
    /// Configured but background sync is not running.
    Idle,
    /// Background sync is active.
    Running,
    /// Unrecoverable setup failure; exited only via disable + enable.
    Error,
}

impl SessionState {
    /// Returns true unless the session is disabled.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, SessionState::Disabled)
    }

    /// Returns true if the background poll may run.
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running)
    }
}

/// Queryable session flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSessionState {
    /// Current lifecycle state.
    pub state: SessionState,
    /// True once device identity and seed are established.
    pub configured: bool,
    /// True once at least one full fetch-resolve cycle completed.
    pub initialized: bool,
}

impl Default for SyncSessionState {
    fn default() -> Self {
        Self {
            state: SessionState::Disabled,
            configured: false,
            initialized: false,
        }
    }
}

/// Observer of session events. All methods default to no-ops.
///
/// Observers query current state through the machine's accessors; the
/// state-changed notification carries no payload.
pub trait SyncObserver: Send + Sync {
    /// The session state changed; query accessors for the new state.
    fn on_sync_state_changed(&self) {}
    /// The transport produced the human-readable sync phrase.
    fn on_have_sync_words(&self, _words: &str) {}
    /// A log-worthy event occurred (the only failure signal surfaced).
    fn on_log_message(&self, _message: &str) {}
}

/// Subscription handle returned by [`StateMachine::add_observer`].
///
/// Pass it back to [`StateMachine::remove_observer`]; no notification
/// is delivered after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverHandle(u64);

/// Owns the session lifecycle and observer registry.
///
/// Transitions are synchronous; every transition notifies registered
/// observers exactly once. Misuse (enabling an already-enabled session,
/// stopping a non-running one) is a silent no-op by design.
pub struct StateMachine {
    state: RwLock<SyncSessionState>,
    observers: Mutex<Vec<(u64, Arc<dyn SyncObserver>)>>,
    next_handle: AtomicU64,
    context: Arc<SessionContext>,
}

impl StateMachine {
    /// Creates a machine in the `Disabled` state.
    pub fn new(context: Arc<SessionContext>) -> Self {
        Self {
            state: RwLock::new(SyncSessionState::default()),
            observers: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(1),
            context,
        }
    }

    /// Registers an observer.
    pub fn add_observer(&self, observer: Arc<dyn SyncObserver>) -> ObserverHandle {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.observers.lock().push((id, observer));
        ObserverHandle(id)
    }

    /// Removes an observer; it receives no further notifications.
    pub fn remove_observer(&self, handle: ObserverHandle) {
        self.observers.lock().retain(|(id, _)| *id != handle.0);
    }

    /// Current session snapshot.
    pub fn session(&self) -> SyncSessionState {
        *self.state.read()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.read().state
    }

    /// True once device identity and seed are established.
    pub fn is_configured(&self) -> bool {
        self.state.read().configured
    }

    /// True once one full fetch-resolve cycle has completed.
    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    /// Enables or disables the session.
    ///
    /// Enabling an already-enabled session is a no-op. Disabling from
    /// any state lands in `Disabled`, resets the configured/initialized
    /// flags, and bumps the generation so in-flight async responses are
    /// dropped. Returns true if a transition happened.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let mut state = self.state.write();
        if enabled {
            if state.state != SessionState::Disabled {
                return false;
            }
            state.state = SessionState::Configuring;
        } else {
            if state.state == SessionState::Disabled {
                return false;
            }
            *state = SyncSessionState::default();
            let generation = self.context.bump_generation();
            debug!(generation, "sync disabled");
        }
        drop(state);
        self.notify_state_changed();
        true
    }

    /// Completes setup: `Configuring` → `Idle`, configured.
    pub fn setup_complete(&self) -> SyncResult<()> {
        let mut state = self.state.write();
        if state.state != SessionState::Configuring {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", state.state),
                to: "Idle".into(),
            });
        }
        state.state = SessionState::Idle;
        state.configured = true;
        drop(state);
        self.notify_state_changed();
        Ok(())
    }

    /// Starts the background poll: `Idle` → `Running`. No-op elsewhere.
    pub fn background_sync_started(&self) {
        let mut state = self.state.write();
        if state.state != SessionState::Idle {
            return;
        }
        state.state = SessionState::Running;
        drop(state);
        self.notify_state_changed();
    }

    /// Stops the background poll: `Running` → `Idle`. No-op elsewhere.
    pub fn background_sync_stopped(&self) {
        let mut state = self.state.write();
        if state.state != SessionState::Running {
            return;
        }
        state.state = SessionState::Idle;
        drop(state);
        self.notify_state_changed();
    }

    /// Marks the first full fetch-resolve cycle as completed.
    pub fn mark_initialized(&self) {
        let mut state = self.state.write();
        if state.initialized {
            return;
        }
        state.initialized = true;
        drop(state);
        self.notify_state_changed();
    }

    /// Enters the `Error` state from any enabled state.
    pub fn mark_error(&self) {
        let mut state = self.state.write();
        if !state.state.is_enabled() || state.state == SessionState::Error {
            return;
        }
        state.state = SessionState::Error;
        drop(state);
        self.notify_state_changed();
    }

    /// Forwards the sync phrase to observers.
    pub fn notify_have_words(&self, words: &str) {
        for observer in self.snapshot_observers() {
            observer.on_have_sync_words(words);
        }
    }

    /// Forwards a log message to observers.
    pub fn notify_log(&self, message: &str) {
        for observer in self.snapshot_observers() {
            observer.on_log_message(message);
        }
    }

    fn notify_state_changed(&self) {
        for observer in self.snapshot_observers() {
            observer.on_sync_state_changed();
        }
    }

    // Callbacks run outside the registry lock so an observer may
    // re-enter add/remove during notification.
    fn snapshot_observers(&self) -> Vec<Arc<dyn SyncObserver>> {
        self.observers
            .lock()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect()
    }
}
