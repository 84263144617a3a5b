//! Portable, versioned World snapshots.
//!
//! A snapshot carries every event, story and beat of one World. Every id inside
//! it refers to another entry of the same payload; the World's own id and owner
//! are never written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use worldgraph_common::{BeatId, EventId, StoryId};
use worldgraph_kernel::{BeatFields, EventFields, StoryFields, WorldFields, WorldState};

/// Version written by [`Snapshot::capture`].
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Versions this build can import.
pub const SUPPORTED_VERSIONS: &[&str] = &[SNAPSHOT_VERSION];

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("unsupported snapshot version {0:?}")]
    UnsupportedVersion(String),
    #[error("snapshot payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("invalid snapshot payload: {0}")]
    Invalid(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEvent {
    pub id: EventId,
    #[serde(flatten)]
    pub fields: EventFields,
    #[serde(default)]
    pub caused_by_ids: Vec<EventId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBeat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<BeatId>,
    #[serde(flatten)]
    pub fields: BeatFields,
    #[serde(default)]
    pub world_event_id: Option<EventId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotStory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<StoryId>,
    #[serde(flatten)]
    pub fields: StoryFields,
    #[serde(default)]
    pub beats: Vec<SnapshotBeat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub world: WorldFields,
    #[serde(default)]
    pub world_events: Vec<SnapshotEvent>,
    #[serde(default)]
    pub stories: Vec<SnapshotStory>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: String,
}

impl Snapshot {
    /// Capture a World. Events come out in timeline order, stories by title and
    /// beats by `order_index`; edges keep their original ids.
    pub fn capture(state: &WorldState, exported_at: DateTime<Utc>) -> Self {
        let world_events = state
            .events_by_time()
            .into_iter()
            .map(|e| SnapshotEvent {
                id: e.id,
                fields: e.fields.clone(),
                caused_by_ids: e.caused_by_ids().iter().copied().collect(),
            })
            .collect();

        let mut stories: Vec<_> = state.stories().collect();
        stories.sort_by(|a, b| a.fields.title.cmp(&b.fields.title).then(a.id.cmp(&b.id)));
        let stories = stories
            .into_iter()
            .map(|s| SnapshotStory {
                id: Some(s.id),
                fields: s.fields.clone(),
                beats: state
                    .beats_of(s.id)
                    .into_iter()
                    .map(|b| SnapshotBeat {
                        id: Some(b.id),
                        fields: b.fields.clone(),
                        world_event_id: b.world_event_id(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            version: SNAPSHOT_VERSION.to_string(),
            exported_at,
            world: state.world().fields.clone(),
            world_events,
            stories,
        }
    }

    pub fn check_version(&self) -> Result<(), SnapshotError> {
        check_version(&self.version)
    }

    pub fn event_count(&self) -> usize {
        self.world_events.len()
    }

    pub fn story_count(&self) -> usize {
        self.stories.len()
    }

    pub fn beat_count(&self) -> usize {
        self.stories.iter().map(|s| s.beats.len()).sum()
    }

    pub fn to_json_pretty(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a JSON payload. The size limit is applied before any parsing and
    /// the version before the full schema, so an unknown version is reported
    /// as such even if its layout differs.
    pub fn from_json_bytes(bytes: &[u8], max_bytes: usize) -> Result<Self, SnapshotError> {
        if bytes.len() > max_bytes {
            return Err(SnapshotError::PayloadTooLarge {
                size: bytes.len(),
                limit: max_bytes,
            });
        }
        let probe: VersionProbe = serde_json::from_slice(bytes)?;
        check_version(&probe.version)?;
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn check_version(version: &str) -> Result<(), SnapshotError> {
    if SUPPORTED_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(SnapshotError::UnsupportedVersion(version.to_string()))
    }
}
