//! # Marksync Protocol
//!
//! Wire record types and order keys for the marksync reconciliation core.
//!
//! This crate provides:
//! - `SyncRecord` for wire-level change descriptors
//! - `OrderKey` and `generate_between` for sibling ordering
//! - `DeviceRecord` for the synced device list
//! - JSON encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod device;
mod order;
mod record;

pub use device::{DeviceList, DeviceRecord};
pub use order::{generate_between, OrderKey};
pub use record::{
    BookmarkPayload, Category, DevicePayload, RecordAction, RecordError, RecordPayload,
    RecordResult, SyncRecord,
};
