//! Room session errors
//!
//! One error type covers signaling, negotiation, media and lifecycle failures.
//! Any error raised while joining ends the room session; once joined, only
//! [`RoomError::is_fatal`] ones do.

use std::error::Error;
use std::fmt;

/// Errors raised by the room session and its components
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    /// Capability negotiation failed for a reason other than lack of support
    Negotiation(String),
    /// The local runtime cannot handle the router's capability set
    UnsupportedCapability(String),
    /// The server answered a request with an error
    Signaling { method: String, reason: String },
    /// The signaling channel went away
    ChannelClosed,
    /// A request was not acknowledged in time
    Timeout(String),
    /// A frame or payload did not match the protocol
    Protocol(String),
    /// Operation attempted on a producer/consumer/transport that is gone
    ResourceState(String),
    /// Capture device unavailable or its track ended
    Device(String),
    /// Invalid configuration
    Config(String),
}

impl RoomError {
    pub fn signaling(method: &str, reason: impl fmt::Display) -> Self {
        RoomError::Signaling {
            method: method.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn protocol(msg: impl fmt::Display) -> Self {
        RoomError::Protocol(msg.to_string())
    }

    pub fn device(msg: impl fmt::Display) -> Self {
        RoomError::Device(msg.to_string())
    }

    pub fn resource_state(msg: impl fmt::Display) -> Self {
        RoomError::ResourceState(msg.to_string())
    }

    /// Whether this error terminates an already joined room. Per-track and
    /// per-peer failures are contained.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RoomError::ChannelClosed)
    }
}

impl fmt::Display for RoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomError::Negotiation(msg) => write!(f, "Negotiation failed: {}", msg),
            RoomError::UnsupportedCapability(msg) => write!(f, "Not supported: {}", msg),
            RoomError::Signaling { method, reason } => {
                write!(f, "Signaling error on {}: {}", method, reason)
            }
            RoomError::ChannelClosed => write!(f, "Signaling channel closed"),
            RoomError::Timeout(method) => write!(f, "Request timed out: {}", method),
            RoomError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            RoomError::ResourceState(msg) => write!(f, "Invalid resource state: {}", msg),
            RoomError::Device(msg) => write!(f, "Device error: {}", msg),
            RoomError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RoomError {}

impl From<serde_json::Error> for RoomError {
    fn from(err: serde_json::Error) -> Self {
        RoomError::Protocol(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RoomError>;
