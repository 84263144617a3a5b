use std::fmt;
use worldgraph_common::{BeatId, EventId, StoryId, WorldId};
use worldgraph_persist::{PersistError, SnapshotError};

/// Something a caller asked for that is missing or belongs to someone else.
/// The two cases are never distinguished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    World(WorldId),
    Event(EventId),
    Story(StoryId),
    Beat(BeatId),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::World(id) => write!(f, "world {id}"),
            Resource::Event(id) => write!(f, "event {id}"),
            Resource::Story(id) => write!(f, "story {id}"),
            Resource::Beat(id) => write!(f, "beat {id}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("event {0} cannot depend on itself")]
    SelfReference(EventId),
    #[error("event {event} and cause {cause} belong to different worlds")]
    CrossWorld { event: EventId, cause: EventId },
    #[error("making {cause} a cause of {event} would create a cycle")]
    Cycle {
        event: EventId,
        cause: EventId,
        path: Vec<EventId>,
    },
    #[error("{0} not found")]
    NotFound(Resource),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("snapshot has {count} {kind}, limit is {limit}")]
    TooManyEntities {
        kind: &'static str,
        count: usize,
        limit: usize,
    },
    #[error("snapshot references {kind} {id} which is not part of the payload")]
    DanglingReference { kind: &'static str, id: String },
    #[error("snapshot lists {kind} {id} more than once")]
    DuplicateId { kind: &'static str, id: String },
    #[error("storage failure: {0}")]
    Storage(PersistError),
}

impl From<PersistError> for GraphError {
    fn from(err: PersistError) -> Self {
        match err {
            PersistError::WorldNotFound(id) => GraphError::NotFound(Resource::World(id)),
            other => GraphError::Storage(other),
        }
    }
}

impl GraphError {
    /// Stable machine-readable code.
    pub fn reason(&self) -> &'static str {
        match self {
            GraphError::SelfReference(_) => "self_reference",
            GraphError::CrossWorld { .. } => "cross_world",
            GraphError::Cycle { .. } => "cycle",
            GraphError::NotFound(_) => "not_found",
            GraphError::Snapshot(SnapshotError::UnsupportedVersion(_)) => "unsupported_version",
            GraphError::Snapshot(SnapshotError::PayloadTooLarge { .. }) => "payload_too_large",
            GraphError::Snapshot(SnapshotError::Invalid(_)) => "invalid_payload",
            GraphError::TooManyEntities { .. } => "too_many_entities",
            GraphError::DanglingReference { .. } => "dangling_reference",
            GraphError::DuplicateId { .. } => "duplicate_id",
            GraphError::Storage(_) => "internal",
        }
    }

    /// HTTP status class for this error.
    pub fn status(&self) -> u16 {
        match self {
            GraphError::NotFound(_) => 404,
            GraphError::Snapshot(SnapshotError::PayloadTooLarge { .. }) => 413,
            GraphError::DanglingReference { .. } | GraphError::DuplicateId { .. } => 422,
            GraphError::Storage(_) => 500,
            _ => 400,
        }
    }

    /// Expected business-rule rejection, as opposed to corruption or a fault.
    pub fn is_validation(&self) -> bool {
        matches!(self.status(), 400 | 404 | 413)
    }
}
