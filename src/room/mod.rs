//! Room session
//!
//! - [`SendSession`]: the outbound transport and local producers
//! - [`ReceiveManager`]: one inbound transport and consumer per remote producer
//! - [`Roster`]: remote peers and their consumed tracks
//! - [`RoomSession`]: join sequencing and event routing

pub mod identity;
pub mod receive;
pub mod roster;
pub mod send;
pub mod session;
pub mod view;

pub use identity::RoomIdentity;
pub use receive::{CloseOutcome, ConsumerInfo, DiscoveryOutcome, ReceiveManager, SubscriptionState};
pub use roster::{ParticipantEntry, PeerId, Roster, RosterChange, TrackSlot};
pub use send::{ProducerInfo, SendSession};
pub use session::{RoomHandle, RoomSession, RoomSnapshot, RoomState};
pub use view::{ChannelView, MediaSurface, RosterView, ViewEvent};
