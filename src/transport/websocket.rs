//! WebSocket transport for the signaling channel
//!
//! Connects to the SFU control plane and bridges the socket to a pair of text
//! queues: one writer task drains the outbound queue into the socket, one
//! reader task pushes inbound text frames into the inbound queue. The inbound
//! queue closes when the socket does.

use crate::error::RoomError;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Both ends of a connected signaling socket
pub struct WebSocketLink {
    /// Text frames to send, in order
    pub outbound: mpsc::UnboundedSender<String>,
    /// Text frames received
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Connect to `url` and start the reader/writer tasks.
///
/// A keepalive ping is sent every `ping_interval`; `Duration::ZERO` disables it.
pub async fn connect(
    url: &str,
    connect_timeout: Duration,
    ping_interval: Duration,
) -> Result<WebSocketLink, RoomError> {
    let (ws_stream, _) = time::timeout(connect_timeout, connect_async(url))
        .await
        .map_err(|_| RoomError::Timeout(format!("connect {}", url)))?
        .map_err(|e| {
            error!("WebSocket connect to {} failed: {}", url, e);
            RoomError::ChannelClosed
        })?;

    info!("Signaling WebSocket connected to {}", url);

    let (write, mut read) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Message>();

    // Writer: application frames and control frames share the sink
    tokio::spawn(async move {
        let mut write = write;
        loop {
            let msg = tokio::select! {
                text = outbound_rx.recv() => match text {
                    Some(text) => Message::Text(text.into()),
                    None => break,
                },
                control = control_rx.recv() => match control {
                    Some(control) => control,
                    None => break,
                },
            };
            if let Err(e) = write.send(msg).await {
                warn!("WebSocket send failed: {}", e);
                break;
            }
        }
        let _ = write.close().await;
        debug!("WebSocket writer stopped");
    });

    // Keepalive
    if !ping_interval.is_zero() {
        let control_tx_ping = control_tx.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(ping_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                if control_tx_ping.send(Message::Ping(Vec::new().into())).is_err() {
                    break;
                }
            }
        });
    }

    // Reader
    tokio::spawn(async move {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if inbound_tx.send(text.to_string()).is_err() {
                        break;
                    }
                }
                Ok(Message::Binary(data)) => {
                    debug!("Ignoring binary frame: {} bytes", data.len());
                }
                Ok(Message::Ping(payload)) => {
                    let _ = control_tx.send(Message::Pong(payload));
                }
                Ok(Message::Pong(_)) => {}
                Ok(Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    info!("Signaling WebSocket closed by server: {:?}", frame);
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
            }
        }
        debug!("WebSocket reader stopped");
    });

    Ok(WebSocketLink {
        outbound: outbound_tx,
        inbound: inbound_rx,
    })
}
