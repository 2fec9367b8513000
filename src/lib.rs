//! sfu-room - client-side SFU room sessions
//!
//! Joins a multi-party room on an SFU, publishes local tracks, subscribes to
//! remote ones and keeps the participant roster in sync.

pub mod config;
pub mod error;
pub mod media;
pub mod room;
pub mod signaling;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use config::Config;
pub use error::RoomError;
pub use room::{RoomHandle, RoomIdentity, RoomSession, RoomState};
pub use signaling::{ServerEvent, SignalingChannel, SignalingMessage};
