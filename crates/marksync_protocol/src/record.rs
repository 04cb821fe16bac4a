//! Wire-level sync records.

use crate::order::OrderKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for record operations.
pub type RecordResult<T> = Result<T, RecordError>;

/// Errors raised while decoding or validating records.
#[derive(Error, Debug)]
pub enum RecordError {
    /// A required field was empty or missing.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Unrecognized category name.
    #[error("unknown category: {0}")]
    UnknownCategory(String),

    /// Unrecognized action code.
    #[error("unknown action code: {0}")]
    UnknownAction(u8),

    /// JSON encode/decode failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A named partition of synced record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    /// Bookmark tree records.
    Bookmarks,
    /// Browsing history records.
    History,
    /// Device list records.
    Devices,
}

impl Category {
    /// The wire name of this category.
    pub fn name(&self) -> &'static str {
        match self {
            Category::Bookmarks => "BOOKMARKS",
            Category::History => "HISTORY",
            Category::Devices => "DEVICES",
        }
    }

    /// Looks up a category by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "BOOKMARKS" => Some(Category::Bookmarks),
            "HISTORY" => Some(Category::History),
            "DEVICES" => Some(Category::Devices),
            _ => None,
        }
    }

    /// All categories, in fetch order.
    pub fn all() -> [Category; 3] {
        [Category::Bookmarks, Category::History, Category::Devices]
    }
}

/// The action a record describes. Travels as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAction {
    /// Object was created.
    Create,
    /// Object was updated (payload or position).
    Update,
    /// Object was deleted; leaves a tombstone.
    Delete,
}

impl RecordAction {
    /// Converts to the numeric wire code.
    pub fn to_code(&self) -> u8 {
        match self {
            RecordAction::Create => 0,
            RecordAction::Update => 1,
            RecordAction::Delete => 2,
        }
    }

    /// Converts from the numeric wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RecordAction::Create),
            1 => Some(RecordAction::Update),
            2 => Some(RecordAction::Delete),
            _ => None,
        }
    }
}

impl Serialize for RecordAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.to_code())
    }
}

impl<'de> Deserialize<'de> for RecordAction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        RecordAction::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown action code: {code}")))
    }
}

/// Payload of a bookmark-like object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookmarkPayload {
    /// Display title.
    pub title: String,
    /// Target URL; empty for folders.
    pub url: String,
    /// True for folder nodes.
    pub folder: bool,
}

impl BookmarkPayload {
    /// Creates a URL bookmark payload.
    pub fn url(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            folder: false,
        }
    }

    /// Creates a folder payload.
    pub fn folder(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: String::new(),
            folder: true,
        }
    }
}

/// Payload of a device-list object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DevicePayload {
    /// Human-readable device name.
    pub name: String,
    /// Platform tag of the device.
    pub platform: String,
}

/// Category-specific record payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RecordPayload {
    /// Bookmark tree node.
    Bookmark(BookmarkPayload),
    /// Device list entry.
    Device(DevicePayload),
}

impl From<BookmarkPayload> for RecordPayload {
    fn from(payload: BookmarkPayload) -> Self {
        RecordPayload::Bookmark(payload)
    }
}

impl From<DevicePayload> for RecordPayload {
    fn from(payload: DevicePayload) -> Self {
        RecordPayload::Device(payload)
    }
}

/// A wire-level change descriptor.
///
/// Records are immutable once constructed; they are produced either
/// locally (outgoing) or remotely (incoming via fetch/resolve).
/// Timestamps are milliseconds, monotonic per originating device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// The category this record belongs to.
    pub category: Category,
    /// Create, update, or delete.
    pub action: RecordAction,
    /// Stable object identity, unique across devices.
    pub object_id: String,
    /// The device that produced this record.
    pub device_id: String,
    /// Position among siblings; absent for deletes and device records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_key: Option<OrderKey>,
    /// Order key of the parent node; absent for roots and device records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_order_key: Option<OrderKey>,
    /// Object payload; absent for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<RecordPayload>,
    /// Milliseconds timestamp, monotonic per device.
    pub timestamp: u64,
}

impl SyncRecord {
    /// Creates a CREATE record.
    pub fn create(
        category: Category,
        object_id: impl Into<String>,
        device_id: impl Into<String>,
        payload: impl Into<RecordPayload>,
        timestamp: u64,
    ) -> Self {
        Self {
            category,
            action: RecordAction::Create,
            object_id: object_id.into(),
            device_id: device_id.into(),
            order_key: None,
            parent_order_key: None,
            payload: Some(payload.into()),
            timestamp,
        }
    }

    /// Creates an UPDATE record.
    pub fn update(
        category: Category,
        object_id: impl Into<String>,
        device_id: impl Into<String>,
        payload: impl Into<RecordPayload>,
        timestamp: u64,
    ) -> Self {
        Self {
            action: RecordAction::Update,
            ..Self::create(category, object_id, device_id, payload, timestamp)
        }
    }

    /// Creates a DELETE record.
    pub fn delete(
        category: Category,
        object_id: impl Into<String>,
        device_id: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            category,
            action: RecordAction::Delete,
            object_id: object_id.into(),
            device_id: device_id.into(),
            order_key: None,
            parent_order_key: None,
            payload: None,
            timestamp,
        }
    }

    /// Attaches order keys.
    pub fn with_order(mut self, order_key: OrderKey, parent_order_key: Option<OrderKey>) -> Self {
        self.order_key = Some(order_key);
        self.parent_order_key = parent_order_key;
        self
    }

    /// The bookmark payload, if this record carries one.
    pub fn bookmark(&self) -> Option<&BookmarkPayload> {
        match &self.payload {
            Some(RecordPayload::Bookmark(p)) => Some(p),
            _ => None,
        }
    }

    /// The device payload, if this record carries one.
    pub fn device(&self) -> Option<&DevicePayload> {
        match &self.payload {
            Some(RecordPayload::Device(p)) => Some(p),
            _ => None,
        }
    }

    /// Checks the fields every record must carry.
    ///
    /// Non-delete records additionally need a payload.
    pub fn validate(&self) -> RecordResult<()> {
        if self.object_id.is_empty() {
            return Err(RecordError::MissingField("object_id"));
        }
        if self.device_id.is_empty() {
            return Err(RecordError::MissingField("device_id"));
        }
        if self.action != RecordAction::Delete && self.payload.is_none() {
            return Err(RecordError::MissingField("payload"));
        }
        Ok(())
    }

    /// Encodes to a JSON string.
    pub fn encode(&self) -> RecordResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from a JSON string and validates.
    pub fn decode(json: &str) -> RecordResult<Self> {
        let record: Self = serde_json::from_str(json)?;
        record.validate()?;
        Ok(record)
    }
}
