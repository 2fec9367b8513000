//! Request/acknowledgment correlation over an ordered text channel
//!
//! Outbound frames go through a single unbounded queue, so requests reach the
//! server in the order they were issued. A dispatcher task reads inbound
//! frames, completes pending requests by id and forwards notifications as
//! [`ServerEvent`]s.

use super::protocol::{ServerEvent, SignalingMessage};
use crate::error::RoomError;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, RoomError>>>>>;

/// Client side of the signaling channel
pub struct SignalingChannel {
    outbound: mpsc::UnboundedSender<String>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl SignalingChannel {
    /// Wrap a pair of text queues (see [`crate::transport::websocket::connect`]).
    ///
    /// Returns the channel and the stream of server events. The event stream
    /// ends with [`ServerEvent::Disconnected`] once the inbound side closes.
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
        request_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(dispatch_inbound(
            inbound,
            pending.clone(),
            closed.clone(),
            events_tx,
        ));

        let channel = Self {
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            request_timeout,
        };
        (channel, events_rx)
    }

    /// Whether the inbound side has gone away
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send a request and wait for its acknowledgment payload
    pub async fn request_raw(&self, method: &str, data: Value) -> Result<Value, RoomError> {
        if self.is_closed() {
            return Err(RoomError::ChannelClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = SignalingMessage::request(id, method, data).to_json()?;

        let (tx, rx) = oneshot::channel();
        {
            // `closed` is set under this lock before the final drain
            let mut pending = self.pending.lock();
            if self.is_closed() {
                return Err(RoomError::ChannelClosed);
            }
            pending.insert(id, tx);
        }

        debug!("-> {} #{}", method, id);
        if self.outbound.send(frame).is_err() {
            self.pending.lock().remove(&id);
            return Err(RoomError::ChannelClosed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result.map_err(|e| match e {
                RoomError::Signaling { reason, .. } => RoomError::signaling(method, reason),
                other => other,
            }),
            Ok(Err(_)) => Err(RoomError::ChannelClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                warn!("Request {} #{} timed out after {:?}", method, id, self.request_timeout);
                Err(RoomError::Timeout(method.to_string()))
            }
        }
    }

    /// Send a typed request and decode the typed acknowledgment
    pub async fn request<P, R>(&self, method: &str, payload: &P) -> Result<R, RoomError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let data = serde_json::to_value(payload)?;
        let value = self.request_raw(method, data).await?;
        serde_json::from_value(value)
            .map_err(|e| RoomError::protocol(format!("Malformed {} response: {}", method, e)))
    }
}

async fn dispatch_inbound(
    mut inbound: mpsc::UnboundedReceiver<String>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    while let Some(text) = inbound.recv().await {
        let message = match SignalingMessage::from_json(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                continue;
            }
        };

        match message {
            SignalingMessage::Response {
                id,
                ok,
                data,
                error_reason,
            } => {
                let Some(tx) = pending.lock().remove(&id) else {
                    debug!("Response #{} has no pending request", id);
                    continue;
                };
                let result = if ok {
                    Ok(data)
                } else {
                    Err(RoomError::signaling(
                        "",
                        error_reason.unwrap_or_else(|| "request rejected".to_string()),
                    ))
                };
                let _ = tx.send(result);
            }
            SignalingMessage::Notification { method, data } => {
                match ServerEvent::from_notification(&method, data) {
                    Ok(Some(event)) => {
                        debug!("<- {}", method);
                        if events.send(event).is_err() {
                            debug!("Event receiver dropped, discarding {}", method);
                        }
                    }
                    Ok(None) => debug!("Ignoring notification {}", method),
                    Err(e) => warn!("Malformed {} notification: {}", method, e),
                }
            }
            SignalingMessage::Request { method, .. } => {
                debug!("Ignoring server request {}", method);
            }
        }
    }

    let waiting: Vec<_> = {
        let mut pending = pending.lock();
        closed.store(true, Ordering::Release);
        pending.drain().collect()
    };
    for (_, tx) in waiting {
        let _ = tx.send(Err(RoomError::ChannelClosed));
    }
    let _ = events.send(ServerEvent::Disconnected);
    info!("Signaling channel closed");
}
