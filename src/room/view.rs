//! Outward sinks: the roster view and the media surface
//!
//! Both only observe state changes; nothing is ever read back from them.

use super::roster::{ParticipantEntry, PeerId};
use crate::media::TrackHandle;
use tokio::sync::mpsc;

/// Element id of the local camera preview
pub const LOCAL_CAMERA_ELEMENT: &str = "localVideo";
/// Element id of the local screen share preview
pub const LOCAL_SCREEN_ELEMENT: &str = "localShareScreen";

/// Receives participant lifecycle events
pub trait RosterView: Send + Sync {
    fn participant_created(&self, entry: &ParticipantEntry);
    fn participant_updated(&self, entry: &ParticipantEntry);
    fn participant_removed(&self, peer_id: &PeerId);
}

/// Renders tracks into named elements
pub trait MediaSurface: Send + Sync {
    fn attach(&self, track: &TrackHandle, element_id: &str);
    fn detach(&self, element_id: &str);
}

/// Everything a view can be told, as a message
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    ParticipantCreated(ParticipantEntry),
    ParticipantUpdated(ParticipantEntry),
    ParticipantRemoved(PeerId),
    Attached { track: TrackHandle, element_id: String },
    Detached { element_id: String },
}

/// Forwards every sink call into a channel, for views living on another task
#[derive(Clone)]
pub struct ChannelView {
    tx: mpsc::UnboundedSender<ViewEvent>,
}

impl ChannelView {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ViewEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: ViewEvent) {
        // A view that went away just stops observing
        let _ = self.tx.send(event);
    }
}

impl RosterView for ChannelView {
    fn participant_created(&self, entry: &ParticipantEntry) {
        self.emit(ViewEvent::ParticipantCreated(entry.clone()));
    }

    fn participant_updated(&self, entry: &ParticipantEntry) {
        self.emit(ViewEvent::ParticipantUpdated(entry.clone()));
    }

    fn participant_removed(&self, peer_id: &PeerId) {
        self.emit(ViewEvent::ParticipantRemoved(peer_id.clone()));
    }
}

impl MediaSurface for ChannelView {
    fn attach(&self, track: &TrackHandle, element_id: &str) {
        self.emit(ViewEvent::Attached {
            track: track.clone(),
            element_id: element_id.to_string(),
        });
    }

    fn detach(&self, element_id: &str) {
        self.emit(ViewEvent::Detached {
            element_id: element_id.to_string(),
        });
    }
}
