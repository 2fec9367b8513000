//! Receive session manager
//!
//! One receive transport and one consumer per remote producer id. Each
//! subscription moves through `TransportRequested -> Consuming -> Closed`.
//! Discovery chains for different producers run concurrently; they are kept
//! apart by an id-keyed registry rather than by holding a lock across
//! signaling round-trips. A `producer-closed` that arrives while a chain is
//! still in flight leaves a tombstone, and the chain discards its results when
//! it next looks at the registry.

use super::roster::{ParticipantEntry, PeerId, Roster, RosterChange};
use super::view::{MediaSurface, RosterView};
use crate::error::RoomError;
use crate::media::{
    ConnectHandler, ConsumeOptions, ConsumerHandle, DtlsParameters, MediaEngine, MediaState,
    NegotiatedCapabilities, RecvTransportHandle, TrackRole,
};
use crate::signaling::SignalingChannel;
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Answers a receive transport's connect callback
struct RecvTransportHandler {
    signaling: Arc<SignalingChannel>,
    server_consumer_transport_id: String,
}

#[async_trait]
impl ConnectHandler for RecvTransportHandler {
    async fn on_connect(&self, dtls_parameters: DtlsParameters) -> Result<(), RoomError> {
        self.signaling
            .transport_recv_connect(&dtls_parameters, &self.server_consumer_transport_id)
            .await?;
        debug!("Receive transport {} connected", self.server_consumer_transport_id);
        Ok(())
    }
}

/// Where a subscription stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Discovery in flight (transport, consume or resume not yet acknowledged)
    TransportRequested,
    /// Consumer live; carries its local pause state
    Consuming(MediaState),
    /// Closed while discovery was still in flight
    Closed,
}

/// Result of a discovery chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Consumer created and resumed
    Subscribed { peer_id: PeerId, role: TrackRole },
    /// Already in flight or consuming
    Duplicate,
    /// The producer closed before the chain finished
    Cancelled,
}

/// Result of a `producer-closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Unknown producer id
    Ignored,
    /// Discovery still in flight; it will discard its results
    Cancelled,
    /// Consumer and transport torn down
    Closed,
}

/// Snapshot of one consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    pub producer_id: String,
    pub consumer_id: String,
    pub peer_id: PeerId,
    pub role: TrackRole,
    pub state: MediaState,
}

struct RemoteConsumer {
    peer_id: PeerId,
    role: TrackRole,
    transport: Arc<dyn RecvTransportHandle>,
    consumer: Arc<dyn ConsumerHandle>,
    state: MediaState,
}

impl RemoteConsumer {
    fn info(&self, producer_id: &str) -> ConsumerInfo {
        ConsumerInfo {
            producer_id: producer_id.to_string(),
            consumer_id: self.consumer.id().to_string(),
            peer_id: self.peer_id.clone(),
            role: self.role,
            state: self.state,
        }
    }

    fn close(&self) {
        self.consumer.close();
        self.transport.close();
    }
}

enum Subscription {
    InFlight,
    Tombstone,
    Consuming(RemoteConsumer),
}

#[derive(Default)]
struct Registry {
    subscriptions: HashMap<String, Subscription>,
    roster: Roster,
}

struct Inner {
    signaling: Arc<SignalingChannel>,
    engine: Arc<dyn MediaEngine>,
    negotiated: NegotiatedCapabilities,
    view: Arc<dyn RosterView>,
    surface: Arc<dyn MediaSurface>,
    registry: Mutex<Registry>,
}

/// Cheap to clone; every clone shares the registry
#[derive(Clone)]
pub struct ReceiveManager {
    inner: Arc<Inner>,
}

/// Local resources created so far by one chain, released on early exit
#[derive(Default)]
struct Partial {
    transport: Option<Arc<dyn RecvTransportHandle>>,
    consumer: Option<Arc<dyn ConsumerHandle>>,
}

impl Partial {
    fn release(&self) {
        if let Some(consumer) = &self.consumer {
            consumer.close();
        }
        if let Some(transport) = &self.transport {
            transport.close();
        }
    }
}

impl ReceiveManager {
    pub fn new(
        signaling: Arc<SignalingChannel>,
        engine: Arc<dyn MediaEngine>,
        negotiated: NegotiatedCapabilities,
        view: Arc<dyn RosterView>,
        surface: Arc<dyn MediaSurface>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                signaling,
                engine,
                negotiated,
                view,
                surface,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Ask the server which producers already exist
    pub async fn existing_producers(&self) -> Result<Vec<String>, RoomError> {
        let ids = self.inner.signaling.get_producers().await?;
        info!("Server reports {} existing producers", ids.len());
        Ok(ids)
    }

    /// Subscribe to a remote producer. Rediscovering an id that is in flight
    /// or consuming does nothing.
    pub async fn discover(&self, producer_id: &str) -> Result<DiscoveryOutcome, RoomError> {
        if !self.begin(producer_id) {
            return Ok(DiscoveryOutcome::Duplicate);
        }
        self.run_chain(producer_id).await
    }

    /// Claim `producer_id` for discovery. `false` when it is already in
    /// flight or consuming. From here on a `producer-closed` for the id
    /// cancels the chain, even before [`ReceiveManager::run_chain`] starts.
    pub fn begin(&self, producer_id: &str) -> bool {
        let mut registry = self.inner.registry.lock();
        if registry.subscriptions.contains_key(producer_id) {
            debug!("Producer {} already discovered", producer_id);
            return false;
        }
        registry
            .subscriptions
            .insert(producer_id.to_string(), Subscription::InFlight);
        true
    }

    /// Run the discovery chain for an id claimed with [`ReceiveManager::begin`]
    pub async fn run_chain(&self, producer_id: &str) -> Result<DiscoveryOutcome, RoomError> {
        debug!("Discovering producer {}", producer_id);

        let mut partial = Partial::default();
        let result = self.subscribe(producer_id, &mut partial).await;
        if !matches!(result, Ok(DiscoveryOutcome::Subscribed { .. })) {
            partial.release();
            let mut registry = self.inner.registry.lock();
            if matches!(
                registry.subscriptions.get(producer_id),
                Some(Subscription::InFlight | Subscription::Tombstone)
            ) {
                registry.subscriptions.remove(producer_id);
            }
        }
        match &result {
            Ok(DiscoveryOutcome::Cancelled) => info!("Producer {} closed during discovery", producer_id),
            Err(e) => warn!("Failed to consume producer {}: {}", producer_id, e),
            _ => {}
        }
        result
    }

    fn cancelled(&self, producer_id: &str) -> bool {
        !matches!(
            self.inner.registry.lock().subscriptions.get(producer_id),
            Some(Subscription::InFlight)
        )
    }

    async fn subscribe(&self, producer_id: &str, partial: &mut Partial) -> Result<DiscoveryOutcome, RoomError> {
        let inner = &self.inner;
        if self.cancelled(producer_id) {
            return Ok(DiscoveryOutcome::Cancelled);
        }

        let params = inner.signaling.create_webrtc_transport(true).await?;
        if self.cancelled(producer_id) {
            return Ok(DiscoveryOutcome::Cancelled);
        }
        let server_transport_id = params.id.clone();
        let handler = Arc::new(RecvTransportHandler {
            signaling: inner.signaling.clone(),
            server_consumer_transport_id: server_transport_id.clone(),
        });
        let transport = inner.engine.create_recv_transport(params, handler)?;
        debug!("Receive transport {} for producer {}", transport.id(), producer_id);
        partial.transport = Some(transport.clone());

        let consume = inner
            .signaling
            .consume(&inner.negotiated.device, producer_id, &server_transport_id)
            .await?;
        if self.cancelled(producer_id) {
            return Ok(DiscoveryOutcome::Cancelled);
        }
        if consume.producer_id != producer_id {
            return Err(RoomError::protocol(format!(
                "consume for {} answered for {}",
                producer_id, consume.producer_id
            )));
        }

        let consumer = transport
            .consume(ConsumeOptions {
                id: consume.id.clone(),
                producer_id: consume.producer_id.clone(),
                kind: consume.kind,
                rtp_parameters: consume.rtp_parameters.clone(),
            })
            .await?;
        partial.consumer = Some(consumer.clone());
        if self.cancelled(producer_id) {
            return Ok(DiscoveryOutcome::Cancelled);
        }

        // Server-side consumers start paused
        inner.signaling.consumer_resume(&consume.server_consumer_id).await?;

        let peer_id = PeerId::new(consume.consumer_socket_id.clone());
        let role = TrackRole::from_parts(consume.kind, consume.consumer_is_share_screen);
        let change = {
            let mut registry = inner.registry.lock();
            if !matches!(registry.subscriptions.get(producer_id), Some(Subscription::InFlight)) {
                return Ok(DiscoveryOutcome::Cancelled);
            }
            registry.subscriptions.insert(
                producer_id.to_string(),
                Subscription::Consuming(RemoteConsumer {
                    peer_id: peer_id.clone(),
                    role,
                    transport,
                    consumer: consumer.clone(),
                    state: MediaState::Active,
                }),
            );
            registry.roster.consumer_added(&peer_id, producer_id, role)
        };

        info!("Consuming {} {} of peer {} ({})", role, producer_id, peer_id, consume.id);
        inner.surface.attach(&consumer.track(), producer_id);
        change.apply(inner.view.as_ref());
        Ok(DiscoveryOutcome::Subscribed { peer_id, role })
    }

    /// Handle `producer-closed`. Unknown ids are ignored.
    pub fn producer_closed(&self, producer_id: &str) -> CloseOutcome {
        let (removed, change) = {
            let mut registry = self.inner.registry.lock();
            match registry.subscriptions.get(producer_id) {
                None => {
                    debug!("Ignoring close of unknown producer {}", producer_id);
                    return CloseOutcome::Ignored;
                }
                Some(Subscription::InFlight) => {
                    registry
                        .subscriptions
                        .insert(producer_id.to_string(), Subscription::Tombstone);
                    return CloseOutcome::Cancelled;
                }
                Some(Subscription::Tombstone) => return CloseOutcome::Cancelled,
                Some(Subscription::Consuming(_)) => {}
            }
            let Some(Subscription::Consuming(removed)) = registry.subscriptions.remove(producer_id) else {
                return CloseOutcome::Ignored;
            };
            let change = registry.roster.consumer_removed(&removed.peer_id, producer_id);
            (removed, change)
        };

        removed.close();
        self.inner.surface.detach(producer_id);
        if let Some(change) = change {
            change.apply(self.inner.view.as_ref());
        }
        info!("Closed consumer for producer {} of peer {}", producer_id, removed.peer_id);
        CloseOutcome::Closed
    }

    /// Pause a consumer locally. `false` when it was already paused or is
    /// not consuming.
    pub fn pause_consumer(&self, producer_id: &str) -> bool {
        self.set_consumer_state(producer_id, MediaState::Paused)
    }

    /// Resume a consumer locally. `false` when it was already active or is
    /// not consuming.
    pub fn resume_consumer(&self, producer_id: &str) -> bool {
        self.set_consumer_state(producer_id, MediaState::Active)
    }

    fn set_consumer_state(&self, producer_id: &str, state: MediaState) -> bool {
        let change = {
            let mut registry = self.inner.registry.lock();
            let Registry { subscriptions, roster } = &mut *registry;
            let Some(Subscription::Consuming(remote)) = subscriptions.get_mut(producer_id) else {
                debug!("No live consumer for {}", producer_id);
                return false;
            };
            if remote.state == state {
                return false;
            }
            match state {
                MediaState::Paused => remote.consumer.pause(),
                MediaState::Active => remote.consumer.resume(),
            }
            remote.state = state;
            roster.consumer_state_changed(&remote.peer_id, producer_id, state)
        };
        if let Some(change) = change {
            change.apply(self.inner.view.as_ref());
        }
        true
    }

    pub fn state_of(&self, producer_id: &str) -> Option<SubscriptionState> {
        match self.inner.registry.lock().subscriptions.get(producer_id)? {
            Subscription::InFlight => Some(SubscriptionState::TransportRequested),
            Subscription::Tombstone => Some(SubscriptionState::Closed),
            Subscription::Consuming(remote) => Some(SubscriptionState::Consuming(remote.state)),
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.inner
            .registry
            .lock()
            .subscriptions
            .values()
            .filter(|s| matches!(s, Subscription::Consuming(_)))
            .count()
    }

    pub fn consumers(&self) -> Vec<ConsumerInfo> {
        let registry = self.inner.registry.lock();
        let mut consumers: Vec<ConsumerInfo> = registry
            .subscriptions
            .iter()
            .filter_map(|(id, s)| match s {
                Subscription::Consuming(remote) => Some(remote.info(id)),
                _ => None,
            })
            .collect();
        consumers.sort_by(|a, b| a.producer_id.cmp(&b.producer_id));
        consumers
    }

    pub fn consumers_for_peer(&self, peer_id: &PeerId) -> Vec<ConsumerInfo> {
        self.consumers()
            .into_iter()
            .filter(|c| &c.peer_id == peer_id)
            .collect()
    }

    pub fn participant(&self, peer_id: &PeerId) -> Option<ParticipantEntry> {
        self.inner.registry.lock().roster.get(peer_id).cloned()
    }

    pub fn participants(&self) -> Vec<ParticipantEntry> {
        self.inner.registry.lock().roster.entries().cloned().collect()
    }

    /// Tear down every consumer. In-flight chains see a tombstone.
    pub fn close_all(&self) {
        let (removed, changes) = {
            let mut registry = self.inner.registry.lock();
            let mut removed = Vec::new();
            for (id, slot) in registry.subscriptions.iter_mut() {
                match std::mem::replace(slot, Subscription::Tombstone) {
                    Subscription::Consuming(remote) => removed.push((id.clone(), remote)),
                    Subscription::InFlight | Subscription::Tombstone => {}
                }
            }
            registry.subscriptions.retain(|id, _| !removed.iter().any(|(r, _)| r == id));
            let changes: Vec<RosterChange> = removed
                .iter()
                .filter_map(|(id, remote)| registry.roster.consumer_removed(&remote.peer_id, id))
                .collect();
            (removed, changes)
        };

        for (id, remote) in &removed {
            remote.close();
            self.inner.surface.detach(id);
        }
        for change in &changes {
            change.apply(self.inner.view.as_ref());
        }
        info!("Receive session closed ({} consumers)", removed.len());
    }
}
