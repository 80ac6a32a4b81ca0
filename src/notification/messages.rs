//! Notification socket wire messages
//!
//! Server → client: `{"type": "new_item" | "item_read" | "count_sync" | "ping", "data": ...}`
//! Client → server: `{"type": "mark_read", "subjectId": ...}` / `{"type": "pong"}`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::NotificationError;
use crate::core_types::SubjectId;

/// One notification as shown in the list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationItem {
    pub id: String,
    /// What the notification is about; `mark_read` targets this
    #[serde(default)]
    pub subject_id: Option<SubjectId>,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    NewItem(NotificationItem),
    ItemRead { id: String },
    CountSync { unread: u64 },
    /// Liveness check; answered with `pong`
    Ping,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct ItemReadData {
    id: String,
}

#[derive(Deserialize)]
struct CountSyncData {
    #[serde(alias = "count")]
    unread: u64,
}

impl ServerMessage {
    /// Parse one text frame
    ///
    /// Returns `Ok(None)` for message types this client does not handle.
    pub fn parse(text: &str) -> Result<Option<Self>, NotificationError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| NotificationError::Decode(e.to_string()))?;

        let message = match envelope.kind.as_str() {
            "new_item" => ServerMessage::NewItem(decode(envelope.data)?),
            "item_read" => {
                let data: ItemReadData = decode(envelope.data)?;
                ServerMessage::ItemRead { id: data.id }
            }
            "count_sync" => {
                let data: CountSyncData = decode(envelope.data)?;
                ServerMessage::CountSync {
                    unread: data.unread,
                }
            }
            "ping" => ServerMessage::Ping,
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, NotificationError> {
    serde_json::from_value(data).map_err(|e| NotificationError::Decode(e.to_string()))
}

/// Outbound command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    MarkRead {
        #[serde(rename = "subjectId")]
        subject_id: SubjectId,
    },
    Pong,
}

impl ClientCommand {
    pub fn to_json(&self) -> Result<String, NotificationError> {
        serde_json::to_string(self).map_err(|e| NotificationError::Decode(e.to_string()))
    }
}
