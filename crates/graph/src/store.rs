//! The GraphStore: validated mutation and reads of a World's causal graph.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use worldgraph_common::{BeatId, EventId, StoryId, UserId, WorldId};
use worldgraph_kernel::{
    BeatFields, DependencyGraph, EventFields, LinkError, StoryFields, WorldEvent, WorldFields,
    WorldState,
};
use worldgraph_persist::{Database, Transaction};

use crate::config::GraphConfig;
use crate::error::{GraphError, Resource};

/// Input for [`GraphStore::create_event`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    #[serde(flatten)]
    pub fields: EventFields,
    /// Validated exactly like [`GraphStore::add_dependency`].
    #[serde(default)]
    pub caused_by_ids: Vec<EventId>,
}

/// Input for [`GraphStore::add_beat`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewBeat {
    #[serde(flatten)]
    pub fields: BeatFields,
    #[serde(default)]
    pub world_event_id: Option<EventId>,
}

#[derive(Debug, Clone)]
pub struct GraphStore {
    db: Arc<Database>,
    config: GraphConfig,
}

impl GraphStore {
    pub fn new(db: Arc<Database>, config: GraphConfig) -> Self {
        Self { db, config }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Committed state of a World owned by `caller`.
    pub fn world(&self, caller: UserId, world: WorldId) -> Result<Arc<WorldState>, GraphError> {
        self.db
            .read_world(world)
            .filter(|state| state.owner() == caller)
            .ok_or(GraphError::NotFound(Resource::World(world)))
    }

    pub fn worlds(&self, caller: UserId) -> Vec<WorldId> {
        self.db.worlds_of(caller)
    }

    pub fn create_world(&self, caller: UserId, fields: WorldFields) -> Result<WorldId, GraphError> {
        let (id, ()) = self
            .db
            .create_world(caller, fields, |_| Ok::<_, GraphError>(()))?;
        tracing::info!(world = %id, owner = %caller, "world created");
        Ok(id)
    }

    /// Delete a World and everything it owns.
    pub fn delete_world(&self, caller: UserId, world: WorldId) -> Result<(), GraphError> {
        self.world(caller, world)?;
        let removed = self.db.delete_world(world)?;
        tracing::info!(
            world = %world,
            events = removed.event_count(),
            stories = removed.story_count(),
            beats = removed.beat_count(),
            "world deleted"
        );
        Ok(())
    }

    /// Create an event. Initial causes go through the same checks as
    /// [`GraphStore::add_dependency`]; any rejection discards the event.
    pub fn create_event(
        &self,
        caller: UserId,
        world: WorldId,
        event: NewEvent,
    ) -> Result<EventId, GraphError> {
        let id = EventId::new();
        self.write(caller, world, |tx| {
            tx.add_event(id, event.fields);
            for cause in event.caused_by_ids {
                attach_cause(tx, caller, id, cause)?;
            }
            Ok(())
        })?;
        tracing::info!(world = %world, event = %id, "event created");
        Ok(id)
    }

    /// Delete an event. Edges pointing at it are dropped and beats that
    /// referenced it keep existing with the reference cleared.
    pub fn delete_event(
        &self,
        caller: UserId,
        world: WorldId,
        event: EventId,
    ) -> Result<(), GraphError> {
        self.write(caller, world, |tx| {
            tx.remove_event(event)
                .map(|_| ())
                .ok_or(GraphError::NotFound(Resource::Event(event)))
        })?;
        tracing::info!(world = %world, event = %event, "event deleted");
        Ok(())
    }

    pub fn create_story(
        &self,
        caller: UserId,
        world: WorldId,
        fields: StoryFields,
    ) -> Result<StoryId, GraphError> {
        let id = StoryId::new();
        self.write(caller, world, |tx| {
            tx.add_story(id, fields);
            Ok(())
        })?;
        tracing::info!(world = %world, story = %id, "story created");
        Ok(id)
    }

    /// Delete a story and its beats.
    pub fn delete_story(
        &self,
        caller: UserId,
        world: WorldId,
        story: StoryId,
    ) -> Result<(), GraphError> {
        self.write(caller, world, |tx| {
            tx.remove_story(story)
                .map(|_| ())
                .ok_or(GraphError::NotFound(Resource::Story(story)))
        })?;
        tracing::info!(world = %world, story = %story, "story deleted");
        Ok(())
    }

    /// Append a beat to a story, optionally linked to an event of the same World.
    pub fn add_beat(
        &self,
        caller: UserId,
        world: WorldId,
        story: StoryId,
        beat: NewBeat,
    ) -> Result<BeatId, GraphError> {
        let id = BeatId::new();
        self.write(caller, world, |tx| {
            tx.add_beat(id, story, beat.fields)
                .map_err(|_| GraphError::NotFound(Resource::Story(story)))?;
            if let Some(event) = beat.world_event_id {
                attach_beat_event(tx, caller, id, event)?;
            }
            Ok(())
        })?;
        tracing::info!(world = %world, story = %story, beat = %id, "beat added");
        Ok(id)
    }

    /// Record that `event` is caused by `cause`.
    ///
    /// Returns `false` when the edge already existed.
    pub fn add_dependency(
        &self,
        caller: UserId,
        world: WorldId,
        event: EventId,
        cause: EventId,
    ) -> Result<bool, GraphError> {
        if event == cause {
            tracing::debug!(world = %world, %event, "self dependency rejected");
            return Err(GraphError::SelfReference(event));
        }
        let added = self.write(caller, world, |tx| attach_cause(tx, caller, event, cause));
        match &added {
            Ok(true) => tracing::info!(world = %world, %event, %cause, "dependency added"),
            Ok(false) => tracing::debug!(world = %world, %event, %cause, "dependency already present"),
            Err(err) if err.is_validation() => {
                tracing::debug!(world = %world, %event, %cause, reason = err.reason(), "dependency rejected")
            }
            Err(err) => tracing::warn!(world = %world, %event, %cause, error = %err, "dependency write failed"),
        }
        added
    }

    /// Drop the edge `event -> cause`. Succeeds whether or not it existed,
    /// including when either event is unknown in this World.
    pub fn remove_dependency(
        &self,
        caller: UserId,
        world: WorldId,
        event: EventId,
        cause: EventId,
    ) -> Result<bool, GraphError> {
        let removed = self.write(caller, world, |tx| Ok(tx.unlink(event, cause)))?;
        if removed {
            tracing::info!(world = %world, %event, %cause, "dependency removed");
        }
        Ok(removed)
    }

    pub fn get_event(
        &self,
        caller: UserId,
        world: WorldId,
        event: EventId,
    ) -> Result<WorldEvent, GraphError> {
        self.world(caller, world)?
            .event(event)
            .cloned()
            .ok_or(GraphError::NotFound(Resource::Event(event)))
    }

    /// All events of a World in timeline order.
    pub fn list_events(&self, caller: UserId, world: WorldId) -> Result<Vec<WorldEvent>, GraphError> {
        let state = self.world(caller, world)?;
        Ok(state.events_by_time().into_iter().cloned().collect())
    }

    /// Direct causes of an event.
    pub fn causes_of(
        &self,
        caller: UserId,
        world: WorldId,
        event: EventId,
    ) -> Result<Vec<EventId>, GraphError> {
        Ok(self
            .get_event(caller, world, event)?
            .caused_by_ids()
            .iter()
            .copied()
            .collect())
    }

    /// Nodes and edges for visualization, from the last committed state.
    pub fn get_dependency_graph(
        &self,
        caller: UserId,
        world: WorldId,
    ) -> Result<DependencyGraph, GraphError> {
        Ok(self.world(caller, world)?.dependency_graph())
    }

    /// Run `f` in a transaction on a World owned by `caller`.
    fn write<T>(
        &self,
        caller: UserId,
        world: WorldId,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, GraphError>,
    ) -> Result<T, GraphError> {
        self.db.transact(world, |tx| {
            if tx.owner() != caller {
                return Err(GraphError::NotFound(Resource::World(world)));
            }
            f(tx)
        })
    }
}

/// The one path by which an edge enters a World. Used by `add_dependency`,
/// event creation and import relinking.
pub(crate) fn attach_cause(
    tx: &mut Transaction<'_>,
    caller: UserId,
    event: EventId,
    cause: EventId,
) -> Result<bool, GraphError> {
    match tx.link(event, cause) {
        Ok(added) => Ok(added),
        Err(LinkError::SelfReference(id)) => Err(GraphError::SelfReference(id)),
        Err(LinkError::UnknownEvent(id) | LinkError::ForeignEvent(id)) => {
            Err(foreign_event(tx, caller, event, cause, id))
        }
        Err(LinkError::Cycle { event, cause, path }) => {
            Err(GraphError::Cycle { event, cause, path })
        }
        Err(LinkError::UnknownStory(id)) => Err(GraphError::NotFound(Resource::Story(id))),
        Err(LinkError::UnknownBeat(id)) => Err(GraphError::NotFound(Resource::Beat(id))),
    }
}

pub(crate) fn attach_beat_event(
    tx: &mut Transaction<'_>,
    caller: UserId,
    beat: BeatId,
    event: EventId,
) -> Result<(), GraphError> {
    tx.set_beat_event(beat, Some(event)).map_err(|err| match err {
        LinkError::ForeignEvent(id) => match tx.locate_event(id) {
            Some((_, owner)) if owner == caller => GraphError::CrossWorld { event: id, cause: id },
            _ => GraphError::NotFound(Resource::Event(id)),
        },
        _ => GraphError::NotFound(Resource::Beat(beat)),
    })
}

/// `missing` is whichever end of `event -> cause` is not in this World. The
/// edge is cross-World only if the caller could see that event; otherwise it
/// does not exist as far as they are concerned.
fn foreign_event(
    tx: &Transaction<'_>,
    caller: UserId,
    event: EventId,
    cause: EventId,
    missing: EventId,
) -> GraphError {
    match tx.locate_event(missing) {
        Some((_, owner)) if owner == caller => GraphError::CrossWorld { event, cause },
        _ => GraphError::NotFound(Resource::Event(missing)),
    }
}
