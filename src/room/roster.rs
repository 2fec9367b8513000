//! Participant roster
//!
//! Maps each remote peer to its active consumers. An entry exists exactly
//! while its peer has at least one consumer; every mutation yields the
//! [`RosterChange`] a view has to apply. No I/O happens here.

use super::view::RosterView;
use crate::media::{MediaState, TrackRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Signaling socket id of a remote peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One consumed track of a participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSlot {
    pub producer_id: String,
    pub role: TrackRole,
    pub state: MediaState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantEntry {
    pub peer_id: PeerId,
    /// Keyed by remote producer id
    pub tracks: BTreeMap<String, TrackSlot>,
}

impl ParticipantEntry {
    fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            tracks: BTreeMap::new(),
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// The track currently filling `role`, if any. Should a peer publish two
    /// tracks under one role, the first by producer id wins.
    pub fn track(&self, role: TrackRole) -> Option<&TrackSlot> {
        self.tracks.values().find(|slot| slot.role == role)
    }
}

/// What a view must do after a roster mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterChange {
    Created(ParticipantEntry),
    Updated(ParticipantEntry),
    Removed(PeerId),
}

impl RosterChange {
    pub fn apply(&self, view: &dyn RosterView) {
        match self {
            RosterChange::Created(entry) => view.participant_created(entry),
            RosterChange::Updated(entry) => view.participant_updated(entry),
            RosterChange::Removed(peer_id) => view.participant_removed(peer_id),
        }
    }
}

#[derive(Debug, Default)]
pub struct Roster {
    entries: BTreeMap<PeerId, ParticipantEntry>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&ParticipantEntry> {
        self.entries.get(peer_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ParticipantEntry> {
        self.entries.values()
    }

    /// Record a new active consumer. Creates the entry on the peer's first one.
    pub fn consumer_added(&mut self, peer_id: &PeerId, producer_id: &str, role: TrackRole) -> RosterChange {
        let slot = TrackSlot {
            producer_id: producer_id.to_string(),
            role,
            state: MediaState::Active,
        };
        match self.entries.get_mut(peer_id) {
            Some(entry) => {
                entry.tracks.insert(producer_id.to_string(), slot);
                RosterChange::Updated(entry.clone())
            }
            None => {
                let mut entry = ParticipantEntry::new(peer_id.clone());
                entry.tracks.insert(producer_id.to_string(), slot);
                self.entries.insert(peer_id.clone(), entry.clone());
                RosterChange::Created(entry)
            }
        }
    }

    /// Drop a consumer. Removes the entry with its last one; `None` when the
    /// consumer was not recorded.
    pub fn consumer_removed(&mut self, peer_id: &PeerId, producer_id: &str) -> Option<RosterChange> {
        let entry = self.entries.get_mut(peer_id)?;
        entry.tracks.remove(producer_id)?;
        if entry.tracks.is_empty() {
            self.entries.remove(peer_id);
            Some(RosterChange::Removed(peer_id.clone()))
        } else {
            Some(RosterChange::Updated(entry.clone()))
        }
    }

    /// Record a pause/resume. `None` when nothing changed.
    pub fn consumer_state_changed(
        &mut self,
        peer_id: &PeerId,
        producer_id: &str,
        state: MediaState,
    ) -> Option<RosterChange> {
        let entry = self.entries.get_mut(peer_id)?;
        let slot = entry.tracks.get_mut(producer_id)?;
        if slot.state == state {
            return None;
        }
        slot.state = state;
        Some(RosterChange::Updated(entry.clone()))
    }
}
