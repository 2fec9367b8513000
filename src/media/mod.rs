//! Media capability boundary
//!
//! Capture, codec negotiation and the ICE/DTLS transports themselves live
//! behind [`MediaEngine`]. The room session only sees opaque parameter blobs
//! and narrow handles for transports, producers and consumers.

pub mod capabilities;

pub use capabilities::{negotiate, NegotiatedCapabilities};

use crate::error::RoomError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a track is used for. Orthogonal to [`MediaKind`]: whether a track is
/// a screen capture travels as `isShareScreen` app metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackRole {
    Camera,
    Microphone,
    ScreenVideo,
    ScreenAudio,
}

impl TrackRole {
    pub const ALL: [TrackRole; 4] = [
        TrackRole::Camera,
        TrackRole::Microphone,
        TrackRole::ScreenVideo,
        TrackRole::ScreenAudio,
    ];

    pub fn kind(&self) -> MediaKind {
        match self {
            TrackRole::Camera | TrackRole::ScreenVideo => MediaKind::Video,
            TrackRole::Microphone | TrackRole::ScreenAudio => MediaKind::Audio,
        }
    }

    pub fn is_screen_share(&self) -> bool {
        matches!(self, TrackRole::ScreenVideo | TrackRole::ScreenAudio)
    }

    /// Recover the role of a remote track from its kind and screen flag
    pub fn from_parts(kind: MediaKind, is_screen_share: bool) -> Self {
        match (kind, is_screen_share) {
            (MediaKind::Video, false) => TrackRole::Camera,
            (MediaKind::Audio, false) => TrackRole::Microphone,
            (MediaKind::Video, true) => TrackRole::ScreenVideo,
            (MediaKind::Audio, true) => TrackRole::ScreenAudio,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackRole::Camera => "camera",
            TrackRole::Microphone => "microphone",
            TrackRole::ScreenVideo => "screen-video",
            TrackRole::ScreenAudio => "screen-audio",
        }
    }
}

impl fmt::Display for TrackRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a producer or consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaState {
    Active,
    Paused,
}

/// Router or device RTP capabilities, kept opaque
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpCapabilities(pub Value);

/// Local DTLS parameters forwarded on transport connect
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DtlsParameters(pub Value);

/// RTP parameters of a producer or consumer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(pub Value);

/// Server-side transport description (`createWebRtcTransport` params).
/// Only `id` is interpreted; ICE/DTLS fields go to the engine untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportParams {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// App metadata attached to every produced track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    pub is_share_screen: bool,
}

/// One simulcast encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncoding {
    pub rid: String,
    pub max_bitrate: u32,
    pub scalability_mode: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecOptions {
    pub video_google_start_bitrate: u32,
}

/// Reference to a track that a media surface can render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackHandle {
    pub id: String,
    pub kind: MediaKind,
}

/// Captured local track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
    pub label: String,
}

impl LocalTrack {
    pub fn handle(&self) -> TrackHandle {
        TrackHandle {
            id: self.id.clone(),
            kind: self.kind,
        }
    }
}

/// What to hand the send transport for one track
#[derive(Debug, Clone)]
pub struct ProduceOptions {
    pub track: LocalTrack,
    pub encodings: Vec<RtpEncoding>,
    pub codec_options: Option<CodecOptions>,
    pub app_data: AppData,
}

/// What the send transport asks the application to signal for one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub app_data: AppData,
}

/// Server-issued description of a consumer to instantiate locally
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeOptions {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

/// Notifications from the capture side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A captured track stopped (device unplugged, screen share ended by the OS)
    TrackEnded { track_id: String },
}

/// Answers a transport's first connect attempt. The transport must not be used
/// until this returns.
#[async_trait]
pub trait ConnectHandler: Send + Sync {
    async fn on_connect(&self, dtls_parameters: DtlsParameters) -> Result<(), RoomError>;
}

/// Answers a send transport's produce attempts with the server-side producer id
#[async_trait]
pub trait ProduceHandler: ConnectHandler {
    async fn on_produce(&self, request: ProduceRequest) -> Result<String, RoomError>;
}

/// Local endpoint that can load capabilities, capture media and build transports
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Load the router capabilities, returning what this runtime supports.
    /// Must fail with [`RoomError::UnsupportedCapability`] when it supports
    /// nothing the router offers.
    async fn load(&self, router: &RtpCapabilities) -> Result<RtpCapabilities, RoomError>;

    /// Acquire camera and/or microphone tracks
    async fn user_media(&self, audio: bool, video: bool) -> Result<Vec<LocalTrack>, RoomError>;

    /// Acquire a screen capture (video, plus audio where the platform offers it)
    async fn display_media(&self) -> Result<Vec<LocalTrack>, RoomError>;

    fn create_send_transport(
        &self,
        params: TransportParams,
        handler: Arc<dyn ProduceHandler>,
    ) -> Result<Arc<dyn SendTransportHandle>, RoomError>;

    fn create_recv_transport(
        &self,
        params: TransportParams,
        handler: Arc<dyn ConnectHandler>,
    ) -> Result<Arc<dyn RecvTransportHandle>, RoomError>;

    /// Take the device event stream. Only the first caller gets it.
    fn take_device_events(&self) -> Option<mpsc::UnboundedReceiver<DeviceEvent>> {
        None
    }
}

/// Outbound transport. `produce` drives the connect and produce handlers and
/// only returns once both have been acknowledged.
#[async_trait]
pub trait SendTransportHandle: Send + Sync {
    fn id(&self) -> &str;
    async fn produce(&self, options: ProduceOptions) -> Result<Arc<dyn ProducerHandle>, RoomError>;
    fn close(&self);
}

/// Inbound transport. `consume` drives the connect handler on first use.
#[async_trait]
pub trait RecvTransportHandle: Send + Sync {
    fn id(&self) -> &str;
    async fn consume(&self, options: ConsumeOptions) -> Result<Arc<dyn ConsumerHandle>, RoomError>;
    fn close(&self);
}

pub trait ProducerHandle: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn track_id(&self) -> &str;
    fn pause(&self);
    fn resume(&self);
    fn close(&self);
}

pub trait ConsumerHandle: Send + Sync {
    fn id(&self) -> &str;
    fn producer_id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn track(&self) -> TrackHandle;
    fn pause(&self);
    fn resume(&self);
    fn close(&self);
}
