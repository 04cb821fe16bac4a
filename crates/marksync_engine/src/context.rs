//! Shared session context.
//!
//! One `SessionContext` is constructed at core startup and shared by
//! reference between the state machine, change processor, and
//! reconciler. It replaces any process-wide mutable state: the
//! generation counter, the remote-origin suppression flag, the
//! pending-local-edit table, and the pending order-key requests all
//! live here.

use crate::order_request::OrderRequestTable;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Shared mutable state of one sync session.
#[derive(Debug, Default)]
pub struct SessionContext {
    /// Bumped on every enable/disable transition; async responses
    /// issued under an older generation are dropped.
    generation: AtomicU64,
    /// Depth of active remote-originated apply scopes.
    remote_depth: AtomicU32,
    /// Uncommitted local edits by object id, with the timestamp the
    /// edit was made. Used for the reconciler's conflict check.
    pending_edits: Mutex<HashMap<String, u64>>,
    /// Outstanding order-key round trips.
    order_requests: Mutex<OrderRequestTable>,
}

impl SessionContext {
    /// Creates a fresh context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Increments the generation, invalidating in-flight async work.
    /// Pending edits and order requests are dropped with it.
    pub fn bump_generation(&self) -> u64 {
        self.pending_edits.lock().clear();
        self.order_requests.lock().clear();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns true while a remote-originated apply is in progress.
    pub fn is_remote_origin(&self) -> bool {
        self.remote_depth.load(Ordering::SeqCst) > 0
    }

    /// Enters a remote-originated scope. Local mutation notifications
    /// observed while the guard is alive must not produce outgoing
    /// records.
    pub fn remote_origin_scope(&self) -> RemoteOriginGuard<'_> {
        self.remote_depth.fetch_add(1, Ordering::SeqCst);
        RemoteOriginGuard { context: self }
    }

    /// Records an uncommitted local edit.
    pub fn note_local_edit(&self, object_id: &str, timestamp: u64) {
        self.pending_edits
            .lock()
            .insert(object_id.to_string(), timestamp);
    }

    /// Clears a local edit once its record has been sent or lost.
    pub fn clear_local_edit(&self, object_id: &str) {
        self.pending_edits.lock().remove(object_id);
    }

    /// Timestamp of the uncommitted local edit for an object, if any.
    pub fn local_edit_at(&self, object_id: &str) -> Option<u64> {
        self.pending_edits.lock().get(object_id).copied()
    }

    /// Locks the order-request table.
    pub fn order_requests(&self) -> MutexGuard<'_, OrderRequestTable> {
        self.order_requests.lock()
    }
}

/// RAII guard for a remote-originated apply scope.
#[derive(Debug)]
pub struct RemoteOriginGuard<'a> {
    context: &'a SessionContext,
}

impl Drop for RemoteOriginGuard<'_> {
    fn drop(&mut self) {
        self.context.remote_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_starts_at_zero_and_bumps() {
        let ctx = SessionContext::new();
        assert_eq!(ctx.generation(), 0);
        assert_eq!(ctx.bump_generation(), 1);
        assert_eq!(ctx.generation(), 1);
    }

    #[test]
    fn remote_origin_scopes_nest() {
        let ctx = SessionContext::new();
        assert!(!ctx.is_remote_origin());
        {
            let _outer = ctx.remote_origin_scope();
            assert!(ctx.is_remote_origin());
            {
                let _inner = ctx.remote_origin_scope();
                assert!(ctx.is_remote_origin());
            }
            assert!(ctx.is_remote_origin());
        }
        assert!(!ctx.is_remote_origin());
    }

    #[test]
    fn pending_edit_lifecycle() {
        let ctx = SessionContext::new();
        assert_eq!(ctx.local_edit_at("obj-1"), None);

        ctx.note_local_edit("obj-1", 100);
        assert_eq!(ctx.local_edit_at("obj-1"), Some(100));

        ctx.clear_local_edit("obj-1");
        assert_eq!(ctx.local_edit_at("obj-1"), None);
    }

    #[test]
    fn bump_generation_drops_pending_work() {
        let ctx = SessionContext::new();
        ctx.note_local_edit("obj-1", 100);
        ctx.order_requests().push(
            0,
            "obj-1",
            marksync_protocol::RecordAction::Create,
            None,
            None,
            marksync_protocol::OrderKey::parse("1.0").unwrap(),
        );

        ctx.bump_generation();
        assert_eq!(ctx.local_edit_at("obj-1"), None);
        assert!(ctx.order_requests().is_empty());
    }
}
