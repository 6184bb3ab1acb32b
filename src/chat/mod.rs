//! Real-time chat for the relay.
//!
//! This module provides:
//! - Client and server event types
//! - Per-connection fan-out grouped by lobby and room
//! - The active room listing
//! - The session coordinator running every chat operation

mod coordinator;
mod event;
mod fanout;
mod registry;

pub use coordinator::{Flow, RoomRef, Session, SessionCoordinator, Submission};
pub use event::{ChatEntry, ClientEvent, ConnectionId, Payload, RoomInfo, ServerEvent};
pub use fanout::{Fanout, Group};
pub use registry::RoomRegistry;
