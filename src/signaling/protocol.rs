//! Signaling wire protocol
//!
//! Every frame is a JSON text message tagged by `type`:
//! - `request`: client → server, correlated by `id`
//! - `response`: server → client, answers the request with the same `id`
//! - `notification`: server → client, unsolicited event

use crate::error::RoomError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Signaling frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    /// Request from the client
    Request {
        id: u64,
        method: String,
        #[serde(default)]
        data: Value,
    },

    /// Acknowledgment from the server
    Response {
        id: u64,
        ok: bool,
        #[serde(default)]
        data: Value,
        #[serde(default, rename = "errorReason", skip_serializing_if = "Option::is_none")]
        error_reason: Option<String>,
    },

    /// Server-pushed event
    Notification {
        method: String,
        #[serde(default)]
        data: Value,
    },
}

impl SignalingMessage {
    /// Parse a signaling frame from JSON
    pub fn from_json(json: &str) -> Result<Self, RoomError> {
        serde_json::from_str(json.trim())
            .map_err(|e| RoomError::protocol(format!("Invalid signaling message: {}", e)))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, RoomError> {
        serde_json::to_string(self)
            .map_err(|e| RoomError::protocol(format!("Failed to serialize message: {}", e)))
    }

    pub fn request(id: u64, method: &str, data: Value) -> Self {
        SignalingMessage::Request {
            id,
            method: method.to_string(),
            data,
        }
    }

    pub fn ok(id: u64, data: Value) -> Self {
        SignalingMessage::Response {
            id,
            ok: true,
            data,
            error_reason: None,
        }
    }

    pub fn error(id: u64, reason: &str) -> Self {
        SignalingMessage::Response {
            id,
            ok: false,
            data: Value::Null,
            error_reason: Some(reason.to_string()),
        }
    }

    pub fn notification(method: &str, data: Value) -> Self {
        SignalingMessage::Notification {
            method: method.to_string(),
            data,
        }
    }

    /// Correlation id, if the frame carries one
    pub fn id(&self) -> Option<u64> {
        match self {
            SignalingMessage::Request { id, .. } | SignalingMessage::Response { id, .. } => {
                Some(*id)
            }
            SignalingMessage::Notification { .. } => None,
        }
    }
}

/// Server-pushed events understood by the room session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The server accepted the connection and assigned a socket id
    ConnectionSuccess { socket_id: String },
    /// A peer started producing
    NewProducer { producer_id: String },
    /// A remote producer went away
    ProducerClosed { remote_producer_id: String },
    /// The signaling channel closed
    Disconnected,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionSuccessData {
    socket_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewProducerData {
    producer_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProducerClosedData {
    remote_producer_id: String,
}

impl ServerEvent {
    pub const CONNECTION_SUCCESS: &'static str = "connection-success";
    pub const NEW_PRODUCER: &'static str = "new-producer";
    pub const PRODUCER_CLOSED: &'static str = "producer-closed";

    /// Decode a notification; `Ok(None)` for methods this client does not handle
    pub fn from_notification(method: &str, data: Value) -> Result<Option<Self>, RoomError> {
        let event = match method {
            Self::CONNECTION_SUCCESS => {
                let data: ConnectionSuccessData = serde_json::from_value(data)?;
                ServerEvent::ConnectionSuccess {
                    socket_id: data.socket_id,
                }
            }
            Self::NEW_PRODUCER => {
                let data: NewProducerData = serde_json::from_value(data)?;
                ServerEvent::NewProducer {
                    producer_id: data.producer_id,
                }
            }
            Self::PRODUCER_CLOSED => {
                let data: ProducerClosedData = serde_json::from_value(data)?;
                ServerEvent::ProducerClosed {
                    remote_producer_id: data.remote_producer_id,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
