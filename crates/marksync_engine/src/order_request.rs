//! Pending order-key request tracking.

use marksync_protocol::{OrderKey, RecordAction};
use std::collections::HashMap;

/// A pending order-key round trip for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    /// Token identifying this request; a newer request for the same
    /// object supersedes it.
    pub token: u64,
    /// Session generation the request was issued under.
    pub generation: u64,
    /// Object awaiting an order key.
    pub object_id: String,
    /// Action to emit once the key arrives.
    pub action: RecordAction,
    /// Left neighbor at request time.
    pub prev: Option<OrderKey>,
    /// Right neighbor at request time.
    pub next: Option<OrderKey>,
    /// Parent order key at request time.
    pub parent: OrderKey,
}

/// Table of outstanding order-key requests, keyed by object id.
///
/// # Invariants
///
/// - At most one outstanding request per object; pushing a new request
///   for the same object replaces (supersedes) the old one, so the old
///   response can no longer match.
/// - A completion is matched by its (prev, next, parent) context, the
///   shape the transport echoes back.
#[derive(Debug, Default)]
pub struct OrderRequestTable {
    by_object: HashMap<String, OrderRequest>,
    next_token: u64,
}

impl OrderRequestTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request, superseding any pending one for the same
    /// object. Returns the new token.
    pub fn push(
        &mut self,
        generation: u64,
        object_id: impl Into<String>,
        action: RecordAction,
        prev: Option<OrderKey>,
        next: Option<OrderKey>,
        parent: OrderKey,
    ) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        let object_id = object_id.into();
        self.by_object.insert(
            object_id.clone(),
            OrderRequest {
                token,
                generation,
                object_id,
                action,
                prev,
                next,
                parent,
            },
        );
        token
    }

    /// Removes and returns the request matching a completion context.
    ///
    /// When several outstanding requests share a context, the oldest
    /// token wins, pairing completions with requests in issuance order.
    /// Returns `None` for superseded or cancelled requests, whose late
    /// responses must be dropped.
    pub fn pop_matching(
        &mut self,
        prev: Option<&OrderKey>,
        next: Option<&OrderKey>,
        parent: &OrderKey,
    ) -> Option<OrderRequest> {
        let object_id = self
            .by_object
            .values()
            .filter(|r| {
                r.prev.as_ref() == prev && r.next.as_ref() == next && &r.parent == parent
            })
            .min_by_key(|r| r.token)
            .map(|r| r.object_id.clone())?;
        self.by_object.remove(&object_id)
    }

    /// Cancels a pending request for an object, if any.
    pub fn cancel(&mut self, object_id: &str) -> Option<OrderRequest> {
        self.by_object.remove(object_id)
    }

    /// Drops every pending request.
    pub fn clear(&mut self) {
        self.by_object.clear();
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.by_object.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.by_object.is_empty()
    }
}
