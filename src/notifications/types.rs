//! Notification record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in the notification feed. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "NotificationWire")]
pub struct NotificationRecord {
    /// Server-assigned id.
    pub id: i64,
    /// Opaque notification content.
    pub payload: serde_json::Value,
    /// When the server created it, or when this client first saw it.
    pub received_at: DateTime<Utc>,
    /// Whether the user has read it.
    pub is_read: bool,
    /// `received_at` was filled in locally because the server sent none.
    #[serde(skip)]
    pub(super) locally_stamped: bool,
}

impl NotificationRecord {
    /// Unread record received now.
    pub fn new(id: i64, payload: serde_json::Value) -> Self {
        Self {
            id,
            payload,
            received_at: Utc::now(),
            is_read: false,
            locally_stamped: true,
        }
    }

    /// Set `received_at`.
    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self.locally_stamped = false;
        self
    }

    /// Set `is_read`.
    pub fn read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }

    /// `payload.title`, falling back to `payload.message`.
    pub fn title(&self) -> Option<&str> {
        self.payload
            .get("title")
            .or_else(|| self.payload.get("message"))
            .and_then(serde_json::Value::as_str)
    }
}

/// Accepted input shapes. Servers either nest content under `payload` or
/// send it inline next to `id`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationWire {
    id: i64,
    #[serde(default)]
    payload: Option<serde_json::Value>,
    #[serde(default, alias = "createdAt")]
    received_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "read")]
    is_read: bool,
    #[serde(flatten)]
    inline: serde_json::Map<String, serde_json::Value>,
}

impl From<NotificationWire> for NotificationRecord {
    fn from(wire: NotificationWire) -> Self {
        let payload = wire.payload.unwrap_or_else(|| {
            if wire.inline.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::Value::Object(wire.inline)
            }
        });
        Self {
            id: wire.id,
            payload,
            locally_stamped: wire.received_at.is_none(),
            received_at: wire.received_at.unwrap_or_else(Utc::now),
            is_read: wire.is_read,
        }
    }
}
