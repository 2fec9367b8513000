//! Send session
//!
//! Owns the single outbound transport and at most one producer per
//! [`TrackRole`]. Pause/resume are local to the producer; closing a producer
//! is signaled with `producerClose`.

use super::view::{MediaSurface, LOCAL_CAMERA_ELEMENT, LOCAL_SCREEN_ELEMENT};
use crate::config::PublishConfig;
use crate::error::RoomError;
use crate::media::{
    CodecOptions, ConnectHandler, DtlsParameters, LocalTrack, MediaEngine, MediaKind, MediaState,
    NegotiatedCapabilities, ProduceHandler, ProduceOptions, ProduceRequest, ProducerHandle,
    SendTransportHandle, TrackRole,
};
use crate::signaling::requests::app_data;
use crate::signaling::SignalingChannel;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Answers the send transport's connect and produce callbacks over signaling
struct SendTransportHandler {
    signaling: Arc<SignalingChannel>,
    discovery: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl ConnectHandler for SendTransportHandler {
    async fn on_connect(&self, dtls_parameters: DtlsParameters) -> Result<(), RoomError> {
        self.signaling.transport_connect(&dtls_parameters).await?;
        info!("Send transport connected");
        Ok(())
    }
}

#[async_trait]
impl ProduceHandler for SendTransportHandler {
    async fn on_produce(&self, request: ProduceRequest) -> Result<String, RoomError> {
        let response = self.signaling.transport_produce(&request).await?;
        debug!(
            "Server producer {} ({}, producersExist: {})",
            response.id, request.kind, response.producers_exist
        );
        if response.producers_exist {
            // Controller may already be gone on shutdown
            let _ = self.discovery.send(());
        }
        Ok(response.id)
    }
}

struct LocalProducer {
    handle: Arc<dyn ProducerHandle>,
    track: LocalTrack,
    state: MediaState,
}

/// Snapshot of one local producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerInfo {
    pub role: TrackRole,
    pub id: String,
    pub track_id: String,
    pub state: MediaState,
}

fn preview_element(role: TrackRole) -> Option<&'static str> {
    match role {
        TrackRole::Camera => Some(LOCAL_CAMERA_ELEMENT),
        TrackRole::ScreenVideo => Some(LOCAL_SCREEN_ELEMENT),
        TrackRole::Microphone | TrackRole::ScreenAudio => None,
    }
}

pub struct SendSession {
    signaling: Arc<SignalingChannel>,
    engine: Arc<dyn MediaEngine>,
    transport: Arc<dyn SendTransportHandle>,
    negotiated: NegotiatedCapabilities,
    publish: PublishConfig,
    surface: Arc<dyn MediaSurface>,
    producers: BTreeMap<TrackRole, LocalProducer>,
}

impl SendSession {
    /// Request the server-side send transport and build the local one.
    ///
    /// `discovery` fires whenever a produce acknowledgment reports that other
    /// producers already exist in the room.
    pub async fn create(
        signaling: Arc<SignalingChannel>,
        engine: Arc<dyn MediaEngine>,
        negotiated: NegotiatedCapabilities,
        discovery: mpsc::UnboundedSender<()>,
        publish: PublishConfig,
        surface: Arc<dyn MediaSurface>,
    ) -> Result<Self, RoomError> {
        let params = signaling.create_webrtc_transport(false).await?;
        info!("Send transport params received: {}", params.id);

        let handler = Arc::new(SendTransportHandler {
            signaling: signaling.clone(),
            discovery,
        });
        let transport = engine.create_send_transport(params, handler)?;
        debug!("Send transport {} ready", transport.id());

        Ok(Self {
            signaling,
            engine,
            transport,
            negotiated,
            publish,
            surface,
            producers: BTreeMap::new(),
        })
    }

    /// Produce `track` under `role`, replacing any producer already there
    pub async fn produce_track(&mut self, role: TrackRole, track: LocalTrack) -> Result<String, RoomError> {
        if track.kind != role.kind() {
            return Err(RoomError::resource_state(format!(
                "{} track {} cannot be produced as {}",
                track.kind, track.id, role
            )));
        }
        if !self.negotiated.supports(track.kind) {
            return Err(RoomError::UnsupportedCapability(format!(
                "no negotiated {} codec",
                track.kind
            )));
        }

        if self.producers.contains_key(&role) {
            debug!("Replacing {} producer", role);
            if let Err(e) = self.close_producer(role).await {
                warn!("Closing previous {} producer: {}", role, e);
            }
        }

        let (encodings, codec_options) = match track.kind {
            MediaKind::Video => (
                self.publish.rtp_encodings(),
                Some(CodecOptions {
                    video_google_start_bitrate: self.publish.video_google_start_bitrate,
                }),
            ),
            MediaKind::Audio => (Vec::new(), None),
        };
        let options = ProduceOptions {
            track: track.clone(),
            encodings,
            codec_options,
            app_data: app_data(role.is_screen_share()),
        };

        let handle = self.transport.produce(options).await?;
        let id = handle.id().to_string();
        info!("Producing {} as {} (track {})", role, id, track.id);

        if let Some(element_id) = preview_element(role) {
            self.surface.attach(&track.handle(), element_id);
        }
        self.producers.insert(
            role,
            LocalProducer {
                handle,
                track,
                state: MediaState::Active,
            },
        );
        Ok(id)
    }

    /// Produce captured camera/microphone tracks, microphone first. A failed
    /// produce only loses that track.
    pub async fn publish_local(&mut self, tracks: Vec<LocalTrack>) -> Result<Vec<TrackRole>, RoomError> {
        let audio = tracks.iter().find(|t| t.kind == MediaKind::Audio).cloned();
        let video = tracks.iter().find(|t| t.kind == MediaKind::Video).cloned();

        let mut produced = Vec::new();
        for (role, track) in [(TrackRole::Microphone, audio), (TrackRole::Camera, video)] {
            let Some(track) = track else { continue };
            if !self.negotiated.supports(role.kind()) {
                warn!("Not publishing {}: no negotiated {} codec", role, role.kind());
                continue;
            }
            match self.produce_track(role, track).await {
                Ok(_) => produced.push(role),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("Failed to produce {}: {}", role, e),
            }
        }
        Ok(produced)
    }

    /// Capture the screen and produce it, with its audio when the capture
    /// has any
    pub async fn start_screen_share(&mut self) -> Result<Vec<TrackRole>, RoomError> {
        let tracks = self.engine.display_media().await?;
        let video = tracks
            .iter()
            .find(|t| t.kind == MediaKind::Video)
            .cloned()
            .ok_or_else(|| RoomError::device("screen capture returned no video track"))?;
        let audio = tracks.iter().find(|t| t.kind == MediaKind::Audio).cloned();

        self.produce_track(TrackRole::ScreenVideo, video).await?;
        let mut produced = vec![TrackRole::ScreenVideo];
        if let Some(audio) = audio {
            match self.produce_track(TrackRole::ScreenAudio, audio).await {
                Ok(_) => produced.push(TrackRole::ScreenAudio),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("Screen share continues without audio: {}", e),
            }
        }
        Ok(produced)
    }

    pub async fn stop_screen_share(&mut self) -> Result<(), RoomError> {
        let video = self.close_producer(TrackRole::ScreenVideo).await;
        let audio = self.close_producer(TrackRole::ScreenAudio).await;
        video.and(audio).map(drop)
    }

    /// Pause the producer under `role`. Returns whether anything changed.
    pub fn pause(&mut self, role: TrackRole) -> bool {
        self.set_state(role, MediaState::Paused)
    }

    /// Resume the producer under `role`. Returns whether anything changed.
    pub fn resume(&mut self, role: TrackRole) -> bool {
        self.set_state(role, MediaState::Active)
    }

    fn set_state(&mut self, role: TrackRole, state: MediaState) -> bool {
        let Some(producer) = self.producers.get_mut(&role) else {
            debug!("No {} producer to {:?}", role, state);
            return false;
        };
        if producer.state == state {
            return false;
        }
        match state {
            MediaState::Paused => producer.handle.pause(),
            MediaState::Active => producer.handle.resume(),
        }
        producer.state = state;
        info!("{} producer {} is now {:?}", role, producer.handle.id(), state);
        true
    }

    /// Close the producer under `role` and tell the server. The role is free
    /// again even if the server does not acknowledge. `Ok(false)` when the
    /// role was empty.
    pub async fn close_producer(&mut self, role: TrackRole) -> Result<bool, RoomError> {
        let Some(producer) = self.producers.remove(&role) else {
            debug!("No {} producer to close", role);
            return Ok(false);
        };
        producer.handle.close();
        if let Some(element_id) = preview_element(role) {
            self.surface.detach(element_id);
        }
        let id = producer.handle.id().to_string();
        info!("Closed {} producer {}", role, id);

        self.signaling.producer_close(&id).await?;
        Ok(true)
    }

    /// React to a capture track ending. Losing the screen video ends the
    /// whole screen share. Returns the roles that were closed.
    pub async fn track_ended(&mut self, track_id: &str) -> Result<Vec<TrackRole>, RoomError> {
        let Some(role) = self
            .producers
            .iter()
            .find(|(_, p)| p.track.id == track_id)
            .map(|(role, _)| *role)
        else {
            debug!("Ended track {} is not being produced", track_id);
            return Ok(Vec::new());
        };

        warn!("{} track {} ended", role, track_id);
        if role == TrackRole::ScreenVideo {
            let had_audio = self.producers.contains_key(&TrackRole::ScreenAudio);
            self.stop_screen_share().await?;
            let mut closed = vec![TrackRole::ScreenVideo];
            if had_audio {
                closed.push(TrackRole::ScreenAudio);
            }
            Ok(closed)
        } else {
            self.close_producer(role).await?;
            Ok(vec![role])
        }
    }

    pub fn producer(&self, role: TrackRole) -> Option<ProducerInfo> {
        self.producers.get(&role).map(|p| ProducerInfo {
            role,
            id: p.handle.id().to_string(),
            track_id: p.track.id.clone(),
            state: p.state,
        })
    }

    pub fn producers(&self) -> Vec<ProducerInfo> {
        self.producers
            .keys()
            .filter_map(|role| self.producer(*role))
            .collect()
    }

    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    /// Close every producer and the transport without signaling; for leaving
    pub fn close_all(&mut self) {
        for (role, producer) in std::mem::take(&mut self.producers) {
            producer.handle.close();
            if let Some(element_id) = preview_element(role) {
                self.surface.detach(element_id);
            }
        }
        self.transport.close();
        info!("Send session closed");
    }
}
