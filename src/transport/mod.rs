//! Transport layer for SFU signaling
//!
//! Carries signaling frames over a WebSocket connection.

pub mod websocket;

pub use websocket::{connect, WebSocketLink};
