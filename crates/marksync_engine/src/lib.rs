//! # Marksync Engine
//!
//! Reconciliation core for bookmark synchronization.
//!
//! This crate provides:
//! - Session state machine (disabled → configuring → idle → running)
//! - Change processor for outbound local mutations
//! - Record reconciler for inbound remote batches
//! - Order-key round-trip tracking with supersession
//! - Transport and storage boundary traits with in-memory test doubles
//!
//! ## Architecture
//!
//! The core is **sans-I/O**: all network, encryption, and persistence
//! live behind the [`SyncClient`], [`BookmarkStore`], and [`SyncPrefs`]
//! traits, and the host drives the core by forwarding transport
//! callbacks into [`SyncService`]. Outbound calls are fire-and-forget;
//! every asynchronous completion is matched against pending state and
//! dropped when it is stale.
//!
//! ## Key Invariants
//!
//! - Remote-origin mutations never echo back as outbound records
//! - At most one order-key request is in flight per object
//! - Disabling sync invalidates every in-flight completion
//! - Deletes win over concurrent edits; tombstones are never resurrected
//! - Reconciliation is deterministic regardless of arrival order

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_processor;
mod client;
mod config;
mod context;
mod error;
mod order_request;
mod prefs;
mod reconciler;
mod service;
mod session;
mod store;

pub use change_processor::ChangeProcessor;
pub use client::{ClientCall, ClientConfig, MockSyncClient, ResolveCandidate, SyncClient};
pub use config::SyncConfig;
pub use context::{RemoteOriginGuard, SessionContext};
pub use error::{SyncError, SyncResult};
pub use order_request::{OrderRequest, OrderRequestTable};
pub use prefs::{MemorySyncPrefs, Seed, SyncPrefs};
pub use reconciler::{AppliedChange, RecordReconciler};
pub use service::SyncService;
pub use session::{
    ObserverHandle, SessionState, StateMachine, SyncObserver, SyncSessionState,
};
pub use store::{BookmarkStore, Item, MemoryBookmarkStore};
