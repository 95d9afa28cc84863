//! Push wire frames.
//!
//! Every text frame is a JSON object with a `type` field:
//!
//! ```json
//! {"type": "notification", "payload": {"id": 3, "isRead": false, ...}}
//! {"type": "unauthorized"}
//! ```
//!
//! Any other `type` is handed to the listener as [`PushEvent::Other`].

use serde::Deserialize;

use crate::notifications::NotificationRecord;

/// Event delivered to a [`super::PushListener`].
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A new (or re-sent) notification.
    Notification(NotificationRecord),
    /// A frame type this client does not act on.
    Other {
        /// The frame's `type`.
        kind: String,
        /// The frame's `payload`, `null` if absent.
        payload: serde_json::Value,
    },
}

/// Decoded text frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Frame {
    Event(PushEvent),
    /// The server no longer accepts the connection's credential.
    Unauthorized,
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Decode one text frame.
pub(crate) fn parse_frame(text: &str) -> Result<Frame, serde_json::Error> {
    let raw: RawFrame = serde_json::from_str(text)?;
    Ok(match raw.kind.as_str() {
        "notification" => Frame::Event(PushEvent::Notification(serde_json::from_value(
            raw.payload,
        )?)),
        "unauthorized" => Frame::Unauthorized,
        _ => Frame::Event(PushEvent::Other {
            kind: raw.kind,
            payload: raw.payload,
        }),
    })
}
