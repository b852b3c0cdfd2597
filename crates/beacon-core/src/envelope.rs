//! The message unit pushed to WebSocket clients.
//!
//! Wire shape, one JSON object per frame:
//!
//! ```text
//! {"type": string, "user_id"?: string, "file_id"?: string, "data"?: any, "message"?: string}
//! ```
//!
//! Unset optional fields are omitted. The hub never looks inside `data`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ClientId;
use crate::machine::StatusSnapshot;

/// Text carried by the welcome envelope.
pub const WELCOME_MESSAGE: &str = "WebSocket connection established";

/// Text carried by every status update envelope.
pub const STATUS_UPDATE_MESSAGE: &str = "Machine status updated";

/// Envelope type tags produced by the server itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeType {
    /// First frame sent on every new connection.
    Connected,
    /// Periodic machine inventory snapshot.
    MachineStatusUpdate,
}

impl EnvelopeType {
    /// Wire value of the `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::MachineStatusUpdate => "machine_status_update",
        }
    }
}

/// A typed message for one or more clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Type tag (`"connected"`, `"machine_status_update"`, or caller defined).
    #[serde(rename = "type")]
    pub kind: String,
    /// Target or subject client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<ClientId>,
    /// Related file, for transfer notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    /// Opaque payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Human-readable text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    /// Create an envelope with only a type tag.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            user_id: None,
            file_id: None,
            data: None,
            message: None,
        }
    }

    /// The welcome frame queued for a freshly upgraded connection.
    pub fn connected(user_id: &ClientId) -> Self {
        Self::new(EnvelopeType::Connected.as_str())
            .with_user(user_id.clone())
            .with_message(WELCOME_MESSAGE)
    }

    /// A status update carrying the snapshot records in fetch order.
    pub fn status_update(snapshot: &StatusSnapshot) -> Result<Self, serde_json::Error> {
        let data = serde_json::to_value(snapshot)?;
        Ok(Self::new(EnvelopeType::MachineStatusUpdate.as_str())
            .with_data(data)
            .with_message(STATUS_UPDATE_MESSAGE))
    }

    /// Set `user_id`.
    #[must_use]
    pub fn with_user(mut self, user_id: ClientId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Set `file_id`.
    #[must_use]
    pub fn with_file(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = Some(file_id.into());
        self
    }

    /// Set `data`.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Set `message`.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Serialize to the single-frame JSON text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
