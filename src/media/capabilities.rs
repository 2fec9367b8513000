//! Capability negotiation
//!
//! The engine loads the router's capability description and reports what the
//! local runtime supports. The negotiated set is the device codecs the router
//! also offers; it decides which kinds may be produced or consumed.

use super::{MediaEngine, MediaKind, RtpCapabilities};
use crate::error::RoomError;
use log::{debug, info};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodecSummary {
    kind: MediaKind,
    mime_type: String,
    clock_rate: u32,
    #[serde(default)]
    channels: Option<u8>,
}

impl CodecSummary {
    fn matches(&self, other: &CodecSummary) -> bool {
        self.kind == other.kind
            && self.mime_type.eq_ignore_ascii_case(&other.mime_type)
            && self.clock_rate == other.clock_rate
            && match (self.channels, other.channels) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }

    fn is_retransmission(&self) -> bool {
        self.mime_type.to_ascii_lowercase().ends_with("/rtx")
    }
}

fn codecs_of(caps: &RtpCapabilities) -> Vec<CodecSummary> {
    caps.0
        .get("codecs")
        .and_then(|codecs| codecs.as_array())
        .map(|codecs| {
            codecs
                .iter()
                .filter_map(|codec| match serde_json::from_value(codec.clone()) {
                    Ok(codec) => Some(codec),
                    Err(e) => {
                        debug!("Skipping unreadable codec entry: {}", e);
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Outcome of loading the router capabilities into the local engine
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedCapabilities {
    /// As advertised by the router at join time
    pub router: RtpCapabilities,
    /// As reported by the local engine; sent with every consume request
    pub device: RtpCapabilities,
    audio: bool,
    video: bool,
}

impl NegotiatedCapabilities {
    /// Whether tracks of this kind can be produced and consumed
    pub fn supports(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }
}

/// Load the router capabilities through the engine and intersect them with
/// what the engine supports.
///
/// Fails with [`RoomError::UnsupportedCapability`] when nothing is shared so
/// the caller can report "not supported" instead of retrying.
pub async fn negotiate(
    engine: &dyn MediaEngine,
    router: &RtpCapabilities,
) -> Result<NegotiatedCapabilities, RoomError> {
    let device = engine.load(router).await.map_err(|e| match e {
        RoomError::UnsupportedCapability(msg) => RoomError::UnsupportedCapability(msg),
        other => RoomError::Negotiation(other.to_string()),
    })?;

    let router_codecs = codecs_of(router);
    let shared: Vec<CodecSummary> = codecs_of(&device)
        .into_iter()
        .filter(|codec| !codec.is_retransmission())
        .filter(|codec| router_codecs.iter().any(|r| r.matches(codec)))
        .collect();

    let audio = shared.iter().any(|c| c.kind == MediaKind::Audio);
    let video = shared.iter().any(|c| c.kind == MediaKind::Video);
    if !audio && !video {
        return Err(RoomError::UnsupportedCapability(
            "no codec in common with the router".to_string(),
        ));
    }

    info!(
        "Negotiated capabilities: {} shared codecs (audio: {}, video: {})",
        shared.len(),
        audio,
        video
    );
    Ok(NegotiatedCapabilities {
        router: router.clone(),
        device,
        audio,
        video,
    })
}
