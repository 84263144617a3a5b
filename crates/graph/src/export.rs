//! Snapshot export.

use chrono::Utc;
use worldgraph_common::{UserId, WorldId};
use worldgraph_persist::Snapshot;

use crate::error::GraphError;
use crate::store::GraphStore;

impl GraphStore {
    /// Export every event, story and beat of a World.
    ///
    /// Reads one committed state, so edges and beat links in the result only
    /// ever point at entries that are also in it.
    pub fn export(&self, caller: UserId, world: WorldId) -> Result<Snapshot, GraphError> {
        let state = self.world(caller, world)?;
        let snapshot = Snapshot::capture(&state, Utc::now());
        tracing::info!(
            world = %world,
            events = snapshot.event_count(),
            stories = snapshot.story_count(),
            beats = snapshot.beat_count(),
            "world exported"
        );
        Ok(snapshot)
    }

    /// [`GraphStore::export`] rendered as pretty JSON.
    pub fn export_json(&self, caller: UserId, world: WorldId) -> Result<String, GraphError> {
        Ok(self.export(caller, world)?.to_json_pretty()?)
    }
}
