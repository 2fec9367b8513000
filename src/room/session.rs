//! Room session controller
//!
//! Sequences the join (connection-success, capture, joinRoom, negotiation,
//! send transport, local production, bulk discovery) and then routes server
//! events, device events and user commands until the room is left or the
//! signaling channel goes away.

use super::identity::RoomIdentity;
use super::receive::{CloseOutcome, ConsumerInfo, DiscoveryOutcome, ReceiveManager};
use super::roster::ParticipantEntry;
use super::send::{ProducerInfo, SendSession};
use super::view::{MediaSurface, RosterView};
use crate::config::PublishConfig;
use crate::error::RoomError;
use crate::media::{negotiate, DeviceEvent, LocalTrack, MediaEngine, TrackRole};
use crate::signaling::{ServerEvent, SignalingChannel};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Waiting for `connection-success`
    Connecting,
    /// Joining, negotiating and publishing
    Joining,
    Joined,
    Closed,
}

/// Point-in-time view of the session
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub session_id: Uuid,
    pub room: String,
    pub local_socket_id: Option<String>,
    pub producers: Vec<ProducerInfo>,
    pub consumers: Vec<ConsumerInfo>,
    pub participants: Vec<ParticipantEntry>,
}

enum RoomCommand {
    SetPaused {
        role: TrackRole,
        paused: bool,
        reply: oneshot::Sender<bool>,
    },
    StartScreenShare {
        reply: oneshot::Sender<Result<Vec<TrackRole>, RoomError>>,
    },
    StopScreenShare {
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    CloseProducer {
        role: TrackRole,
        reply: oneshot::Sender<Result<bool, RoomError>>,
    },
    SetRemotePaused {
        producer_id: String,
        paused: bool,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
    Leave,
}

/// Control handle for a running [`RoomSession`]
#[derive(Clone)]
pub struct RoomHandle {
    commands: mpsc::UnboundedSender<RoomCommand>,
    state: watch::Receiver<RoomState>,
}

impl RoomHandle {
    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> RoomCommand) -> Result<T, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| RoomError::resource_state("room session has ended"))?;
        rx.await
            .map_err(|_| RoomError::resource_state("room session has ended"))
    }

    pub fn state(&self) -> RoomState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `state` (or has closed)
    pub async fn wait_for(&self, state: RoomState) -> RoomState {
        let mut rx = self.state.clone();
        let reached = match rx.wait_for(|s| *s == state || *s == RoomState::Closed).await {
            Ok(s) => *s,
            Err(_) => RoomState::Closed,
        };
        reached
    }

    /// Pause or resume a local producer. `false` when nothing changed.
    pub async fn set_paused(&self, role: TrackRole, paused: bool) -> Result<bool, RoomError> {
        self.call(|reply| RoomCommand::SetPaused { role, paused, reply }).await
    }

    pub async fn start_screen_share(&self) -> Result<Vec<TrackRole>, RoomError> {
        self.call(|reply| RoomCommand::StartScreenShare { reply }).await?
    }

    pub async fn stop_screen_share(&self) -> Result<(), RoomError> {
        self.call(|reply| RoomCommand::StopScreenShare { reply }).await?
    }

    pub async fn close_producer(&self, role: TrackRole) -> Result<bool, RoomError> {
        self.call(|reply| RoomCommand::CloseProducer { role, reply }).await?
    }

    /// Pause or resume a remote track locally. `false` when nothing changed.
    pub async fn set_remote_paused(&self, producer_id: &str, paused: bool) -> Result<bool, RoomError> {
        let producer_id = producer_id.to_string();
        self.call(|reply| RoomCommand::SetRemotePaused {
            producer_id,
            paused,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        self.call(|reply| RoomCommand::Snapshot { reply }).await
    }

    pub fn leave(&self) {
        let _ = self.commands.send(RoomCommand::Leave);
    }
}

enum TaskOutput {
    Producers(Result<Vec<String>, RoomError>),
    Discovered(String, Result<DiscoveryOutcome, RoomError>),
}

/// Discovery chains in flight
type Tasks = FuturesUnordered<BoxFuture<'static, TaskOutput>>;

/// Claim `producer_id` now and queue its chain, so a `producer-closed`
/// routed before the chain is first polled still cancels it
fn spawn_discovery(tasks: &Tasks, receive: &ReceiveManager, producer_id: String) {
    if !receive.begin(&producer_id) {
        return;
    }
    let receive = receive.clone();
    tasks.push(
        async move {
            let outcome = receive.run_chain(&producer_id).await;
            TaskOutput::Discovered(producer_id, outcome)
        }
        .boxed(),
    );
}

/// Route one server event once joined. Only a lost channel is an error.
fn route_event(id: Uuid, event: ServerEvent, tasks: &Tasks, receive: &ReceiveManager) -> Result<(), RoomError> {
    match event {
        ServerEvent::NewProducer { producer_id } => {
            debug!("[{}] new-producer {}", id, producer_id);
            spawn_discovery(tasks, receive, producer_id);
        }
        ServerEvent::ProducerClosed { remote_producer_id } => {
            if receive.producer_closed(&remote_producer_id) == CloseOutcome::Ignored {
                debug!("[{}] producer-closed for unknown {}", id, remote_producer_id);
            }
        }
        ServerEvent::ConnectionSuccess { socket_id } => {
            debug!("[{}] Repeated connection-success ({})", id, socket_id);
        }
        ServerEvent::Disconnected => return Err(RoomError::ChannelClosed),
    }
    Ok(())
}

fn spawn_bulk_discovery(tasks: &Tasks, receive: &ReceiveManager) {
    let receive = receive.clone();
    tasks.push(async move { TaskOutput::Producers(receive.existing_producers().await) }.boxed());
}

async fn next_device_event(events: &mut Option<mpsc::UnboundedReceiver<DeviceEvent>>) -> Option<DeviceEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

/// Client side of one room
pub struct RoomSession {
    id: Uuid,
    room: RoomIdentity,
    signaling: Arc<SignalingChannel>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    engine: Arc<dyn MediaEngine>,
    view: Arc<dyn RosterView>,
    surface: Arc<dyn MediaSurface>,
    publish: PublishConfig,
    commands: mpsc::UnboundedReceiver<RoomCommand>,
    state: Arc<watch::Sender<RoomState>>,
}

impl RoomSession {
    pub fn new(
        room: RoomIdentity,
        signaling: Arc<SignalingChannel>,
        events: mpsc::UnboundedReceiver<ServerEvent>,
        engine: Arc<dyn MediaEngine>,
        view: Arc<dyn RosterView>,
        surface: Arc<dyn MediaSurface>,
        publish: PublishConfig,
    ) -> (Self, RoomHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(RoomState::Connecting);
        let session = Self {
            id: Uuid::new_v4(),
            room,
            signaling,
            events,
            engine,
            view,
            surface,
            publish,
            commands,
            state: Arc::new(state),
        };
        let handle = RoomHandle {
            commands: commands_tx,
            state: state_rx,
        };
        (session, handle)
    }

    /// Run the session to completion. `Ok` after [`RoomHandle::leave`];
    /// an error when joining fails or the signaling channel is lost.
    pub async fn run(self) -> Result<(), RoomError> {
        let state = self.state.clone();
        let result = self.run_inner().await;
        if let Err(e) = &result {
            error!("Room session ended: {}", e);
        }
        state.send_replace(RoomState::Closed);
        result
    }

    async fn run_inner(self) -> Result<(), RoomError> {
        let RoomSession {
            id,
            room,
            signaling,
            mut events,
            engine,
            view,
            surface,
            publish,
            mut commands,
            state,
        } = self;
        info!("[{}] Connecting to room {}", id, room);

        // Nothing but connection-success is expected before joining; keep
        // anything else for after setup.
        let mut backlog = Vec::new();
        let local_socket_id = loop {
            match events.recv().await {
                Some(ServerEvent::ConnectionSuccess { socket_id }) => break socket_id,
                Some(ServerEvent::Disconnected) | None => return Err(RoomError::ChannelClosed),
                Some(other) => backlog.push(other),
            }
        };
        info!("[{}] Connected as {}", id, local_socket_id);
        state.send_replace(RoomState::Joining);

        let captured = acquire_user_media(engine.as_ref(), &publish).await;

        let joined = signaling.join_room(room.name()).await?;
        let negotiated = negotiate(engine.as_ref(), &joined.rtp_capabilities).await?;

        let (discovery_tx, mut discovery_rx) = mpsc::unbounded_channel();
        let mut send = SendSession::create(
            signaling.clone(),
            engine.clone(),
            negotiated.clone(),
            discovery_tx,
            publish,
            surface.clone(),
        )
        .await?;
        let receive = ReceiveManager::new(signaling.clone(), engine.clone(), negotiated, view, surface);
        let mut tasks: Tasks = FuturesUnordered::new();

        let produced = match captured {
            Some(tracks) => send.publish_local(tracks).await?,
            None => Vec::new(),
        };
        if produced.is_empty() {
            // No produce acknowledgment will report existing producers
            info!("[{}] Joined receive-only", id);
            spawn_bulk_discovery(&tasks, &receive);
        }

        for event in backlog {
            route_event(id, event, &tasks, &receive)?;
        }

        let mut device_events = engine.take_device_events();
        let mut commands_open = true;
        state.send_replace(RoomState::Joined);
        info!(
            "[{}] Joined room {} with {} local producers",
            id,
            room,
            send.producer_count()
        );

        let result = loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break Err(RoomError::ChannelClosed) };
                    if let Err(e) = route_event(id, event, &tasks, &receive) {
                        break Err(e);
                    }
                }
                Some(()) = discovery_rx.recv() => {
                    spawn_bulk_discovery(&tasks, &receive);
                }
                Some(DeviceEvent::TrackEnded { track_id }) = next_device_event(&mut device_events), if device_events.is_some() => {
                    match send.track_ended(&track_id).await {
                        Ok(closed) if !closed.is_empty() => info!("[{}] Stopped {:?} after track end", id, closed),
                        Ok(_) => {}
                        Err(e) if e.is_fatal() => break Err(e),
                        Err(e) => warn!("[{}] Closing ended track {}: {}", id, track_id, e),
                    }
                }
                command = commands.recv(), if commands_open => match command {
                    Some(RoomCommand::Leave) => break Ok(()),
                    Some(RoomCommand::Snapshot { reply }) => {
                        let _ = reply.send(RoomSnapshot {
                            session_id: id,
                            room: room.name().to_string(),
                            local_socket_id: Some(local_socket_id.clone()),
                            producers: send.producers(),
                            consumers: receive.consumers(),
                            participants: receive.participants(),
                        });
                    }
                    Some(command) => {
                        if let Err(e) = handle_command(command, &mut send, &receive).await {
                            break Err(e);
                        }
                    }
                    None => {
                        debug!("[{}] All room handles dropped", id);
                        commands_open = false;
                    }
                },
                Some(output) = tasks.next(), if !tasks.is_empty() => match output {
                    TaskOutput::Producers(Ok(ids)) => {
                        for producer_id in ids {
                            spawn_discovery(&tasks, &receive, producer_id);
                        }
                    }
                    TaskOutput::Producers(Err(e)) if e.is_fatal() => break Err(e),
                    TaskOutput::Producers(Err(e)) => warn!("[{}] getProducers failed: {}", id, e),
                    TaskOutput::Discovered(_, Ok(_)) => {}
                    TaskOutput::Discovered(_, Err(e)) if e.is_fatal() => break Err(e),
                    TaskOutput::Discovered(producer_id, Err(e)) => {
                        warn!("[{}] Skipping producer {}: {}", id, producer_id, e);
                    }
                },
            }
        };

        send.close_all();
        receive.close_all();
        info!("[{}] Left room {}", id, room);
        result
    }
}

/// Capture camera and microphone. A capture failure is contained: the room is
/// then joined receive-only.
async fn acquire_user_media(engine: &dyn MediaEngine, publish: &PublishConfig) -> Option<Vec<LocalTrack>> {
    if !publish.camera && !publish.microphone {
        return None;
    }
    match engine.user_media(publish.microphone, publish.camera).await {
        Ok(tracks) => Some(tracks),
        Err(e) => {
            warn!("Local media unavailable, joining receive-only: {}", e);
            None
        }
    }
}

fn fatal<T>(result: &Result<T, RoomError>) -> bool {
    matches!(result, Err(e) if e.is_fatal())
}

/// Apply one user command. Only a fatal error is returned; the rest are
/// answered to the caller.
async fn handle_command(
    command: RoomCommand,
    send: &mut SendSession,
    receive: &ReceiveManager,
) -> Result<(), RoomError> {
    match command {
        RoomCommand::SetPaused { role, paused, reply } => {
            let changed = if paused { send.pause(role) } else { send.resume(role) };
            let _ = reply.send(changed);
        }
        RoomCommand::StartScreenShare { reply } => {
            let result = send.start_screen_share().await;
            if fatal(&result) {
                return result.map(drop);
            }
            let _ = reply.send(result);
        }
        RoomCommand::StopScreenShare { reply } => {
            let result = send.stop_screen_share().await;
            if fatal(&result) {
                return result;
            }
            let _ = reply.send(result);
        }
        RoomCommand::CloseProducer { role, reply } => {
            let result = send.close_producer(role).await;
            if fatal(&result) {
                return result.map(drop);
            }
            let _ = reply.send(result);
        }
        RoomCommand::SetRemotePaused {
            producer_id,
            paused,
            reply,
        } => {
            let changed = if paused {
                receive.pause_consumer(&producer_id)
            } else {
                receive.resume_consumer(&producer_id)
            };
            let _ = reply.send(changed);
        }
        RoomCommand::Snapshot { .. } | RoomCommand::Leave => {}
    }
    Ok(())
}
