//! SFU signaling
//!
//! This module provides the control-plane side of the room:
//! - Wire framing of requests, acknowledgments and notifications
//! - Request/acknowledgment correlation over one ordered channel
//! - Typed room protocol requests

pub mod channel;
pub mod protocol;
pub mod requests;

pub use channel::SignalingChannel;
pub use protocol::{ServerEvent, SignalingMessage};
pub use requests::{ConsumeParams, JoinRoomResponse, ProduceResponse};
