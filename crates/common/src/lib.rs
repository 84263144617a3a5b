//! Shared types for the world event graph: typed identifiers and the closed
//! enumerations every other crate branches on.

pub mod kinds;
pub mod types;

pub use kinds::{BeatType, ChronologyMode, EventType, GeneratedBy, UnknownKind};
pub use types::{BeatId, EventId, StoryId, UserId, WorldId};
