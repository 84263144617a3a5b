use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use worldgraph_common::{
    BeatId, BeatType, ChronologyMode, EventId, EventType, GeneratedBy, StoryId, UserId, WorldId,
};

use crate::cycle::{self, CausalEdges};
use crate::graph::DependencyGraph;

/// Rejection of an edge or reference mutation on a [`WorldState`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinkError {
    #[error("event {0} cannot depend on itself")]
    SelfReference(EventId),
    #[error("event {0} does not exist in this world")]
    UnknownEvent(EventId),
    /// The referenced event is not part of this World. Whether it exists
    /// elsewhere is for the caller to decide.
    #[error("event {0} is not part of this world")]
    ForeignEvent(EventId),
    #[error("edge {event} -> {cause} would close a cycle of length {}", path.len())]
    Cycle {
        event: EventId,
        cause: EventId,
        path: Vec<EventId>,
    },
    #[error("story {0} does not exist in this world")]
    UnknownStory(StoryId),
    #[error("beat {0} does not exist in this world")]
    UnknownBeat(BeatId),
}

/// Descriptive fields of a World. Ownership and identity live on [`World`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldFields {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub backdrop: String,
    #[serde(default)]
    pub laws: Vec<String>,
    #[serde(default)]
    pub chronology_mode: ChronologyMode,
}

/// The World row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub id: WorldId,
    pub user_id: UserId,
    pub fields: WorldFields,
}

/// Non-relational fields of a timeline event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFields {
    pub t: f64,
    #[serde(default)]
    pub label_time: String,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(rename = "type", default)]
    pub event_type: EventType,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// A canonical event on the World's objective timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldEvent {
    pub id: EventId,
    pub world_id: WorldId,
    pub fields: EventFields,
    /// Causal predecessors. Only mutated through [`WorldState::link`] and
    /// [`WorldState::unlink`].
    caused_by_ids: BTreeSet<EventId>,
}

impl WorldEvent {
    pub fn caused_by_ids(&self) -> &BTreeSet<EventId> {
        &self.caused_by_ids
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryFields {
    pub title: String,
    #[serde(default)]
    pub synopsis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub world_id: WorldId,
    pub fields: StoryFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeatFields {
    pub order_index: u32,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub beat_type: BeatType,
    #[serde(default)]
    pub generated_by: GeneratedBy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryBeat {
    pub id: BeatId,
    pub story_id: StoryId,
    pub fields: BeatFields,
    /// Weak reference; cleared when the event is removed.
    world_event_id: Option<EventId>,
}

impl StoryBeat {
    pub fn world_event_id(&self) -> Option<EventId> {
        self.world_event_id
    }
}

/// Everything one World owns.
///
/// Tables are `BTreeMap`s so iteration order is deterministic. Row insertion
/// never carries relational fields; edges and beat references are attached
/// afterwards through validated operations, which keeps both invariants true
/// for every reachable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    world: World,
    events: BTreeMap<EventId, WorldEvent>,
    stories: BTreeMap<StoryId, Story>,
    beats: BTreeMap<BeatId, StoryBeat>,
}

impl WorldState {
    pub fn new(id: WorldId, user_id: UserId, fields: WorldFields) -> Self {
        Self {
            world: World {
                id,
                user_id,
                fields,
            },
            events: BTreeMap::new(),
            stories: BTreeMap::new(),
            beats: BTreeMap::new(),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn id(&self) -> WorldId {
        self.world.id
    }

    pub fn owner(&self) -> UserId {
        self.world.user_id
    }

    pub fn set_fields(&mut self, fields: WorldFields) {
        self.world.fields = fields;
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn edge_count(&self) -> usize {
        self.events.values().map(|e| e.caused_by_ids.len()).sum()
    }

    pub fn story_count(&self) -> usize {
        self.stories.len()
    }

    pub fn beat_count(&self) -> usize {
        self.beats.len()
    }

    pub fn event(&self, id: EventId) -> Option<&WorldEvent> {
        self.events.get(&id)
    }

    pub fn contains_event(&self, id: EventId) -> bool {
        self.events.contains_key(&id)
    }

    pub fn events(&self) -> impl Iterator<Item = &WorldEvent> {
        self.events.values()
    }

    pub fn event_ids(&self) -> impl Iterator<Item = EventId> + '_ {
        self.events.keys().copied()
    }

    /// Events ordered by timeline position, ties broken by id.
    pub fn events_by_time(&self) -> Vec<&WorldEvent> {
        let mut events: Vec<&WorldEvent> = self.events.values().collect();
        events.sort_by(|a, b| a.fields.t.total_cmp(&b.fields.t).then(a.id.cmp(&b.id)));
        events
    }

    pub fn story(&self, id: StoryId) -> Option<&Story> {
        self.stories.get(&id)
    }

    pub fn stories(&self) -> impl Iterator<Item = &Story> {
        self.stories.values()
    }

    pub fn beat(&self, id: BeatId) -> Option<&StoryBeat> {
        self.beats.get(&id)
    }

    /// Beats of a story in `order_index` order, ties broken by id.
    pub fn beats_of(&self, story: StoryId) -> Vec<&StoryBeat> {
        let mut beats: Vec<&StoryBeat> = self
            .beats
            .values()
            .filter(|b| b.story_id == story)
            .collect();
        beats.sort_by_key(|b| (b.fields.order_index, b.id));
        beats
    }

    /// Insert an event with no causes.
    pub fn add_event(&mut self, id: EventId, fields: EventFields) -> &WorldEvent {
        let event = WorldEvent {
            id,
            world_id: self.world.id,
            fields,
            caused_by_ids: BTreeSet::new(),
        };
        self.events.entry(id).or_insert(event)
    }

    /// Remove an event. Edges pointing at it are dropped and beats that
    /// referenced it lose the reference.
    pub fn remove_event(&mut self, id: EventId) -> Option<WorldEvent> {
        let removed = self.events.remove(&id)?;
        for event in self.events.values_mut() {
            event.caused_by_ids.remove(&id);
        }
        for beat in self.beats.values_mut() {
            if beat.world_event_id == Some(id) {
                beat.world_event_id = None;
            }
        }
        Some(removed)
    }

    /// Validate the edge `event -> cause` without applying it.
    pub fn check_link(&self, event: EventId, cause: EventId) -> Result<(), LinkError> {
        if event == cause {
            return Err(LinkError::SelfReference(event));
        }
        if !self.events.contains_key(&event) {
            return Err(LinkError::UnknownEvent(event));
        }
        if !self.events.contains_key(&cause) {
            return Err(LinkError::ForeignEvent(cause));
        }
        if let Some(path) = cycle::cycle_path(self, event, cause) {
            return Err(LinkError::Cycle { event, cause, path });
        }
        Ok(())
    }

    /// Record that `event` is caused by `cause`.
    ///
    /// Returns `Ok(false)` when the edge already existed.
    pub fn link(&mut self, event: EventId, cause: EventId) -> Result<bool, LinkError> {
        if self
            .events
            .get(&event)
            .is_some_and(|e| e.caused_by_ids.contains(&cause))
        {
            return Ok(false);
        }
        self.check_link(event, cause)?;
        let inserted = self
            .events
            .get_mut(&event)
            .map(|e| e.caused_by_ids.insert(cause))
            .unwrap_or(false);
        Ok(inserted)
    }

    /// Drop the edge `event -> cause`. Returns whether it existed.
    pub fn unlink(&mut self, event: EventId, cause: EventId) -> bool {
        self.events
            .get_mut(&event)
            .map(|e| e.caused_by_ids.remove(&cause))
            .unwrap_or(false)
    }

    pub fn add_story(&mut self, id: StoryId, fields: StoryFields) -> &Story {
        let story = Story {
            id,
            world_id: self.world.id,
            fields,
        };
        self.stories.entry(id).or_insert(story)
    }

    /// Remove a story and all of its beats.
    pub fn remove_story(&mut self, id: StoryId) -> Option<Story> {
        let story = self.stories.remove(&id)?;
        self.beats.retain(|_, b| b.story_id != id);
        Some(story)
    }

    /// Insert a beat with no event reference.
    pub fn add_beat(
        &mut self,
        id: BeatId,
        story: StoryId,
        fields: BeatFields,
    ) -> Result<&StoryBeat, LinkError> {
        if !self.stories.contains_key(&story) {
            return Err(LinkError::UnknownStory(story));
        }
        let beat = StoryBeat {
            id,
            story_id: story,
            fields,
            world_event_id: None,
        };
        Ok(self.beats.entry(id).or_insert(beat))
    }

    pub fn remove_beat(&mut self, id: BeatId) -> Option<StoryBeat> {
        self.beats.remove(&id)
    }

    /// Point a beat at an event of this World, or clear the reference.
    pub fn set_beat_event(&mut self, beat: BeatId, event: Option<EventId>) -> Result<(), LinkError> {
        if let Some(event) = event {
            if !self.events.contains_key(&event) {
                return Err(LinkError::ForeignEvent(event));
            }
        }
        let row = self.beats.get_mut(&beat).ok_or(LinkError::UnknownBeat(beat))?;
        row.world_event_id = event;
        Ok(())
    }

    /// A cycle in the current edge set, if any. Always `None` for states built
    /// through [`WorldState::link`].
    pub fn find_cycle(&self) -> Option<Vec<EventId>> {
        cycle::find_cycle(self, self.event_ids())
    }

    /// Causes listed by some event that are not events of this World.
    pub fn dangling_causes(&self) -> Vec<(EventId, EventId)> {
        self.events
            .values()
            .flat_map(|e| {
                e.caused_by_ids
                    .iter()
                    .filter(|c| !self.events.contains_key(c))
                    .map(move |c| (e.id, *c))
            })
            .collect()
    }

    /// Re-check every invariant on state that was deserialized rather than built
    /// through the validated operations.
    pub fn check_integrity(&self) -> Result<(), LinkError> {
        for event in self.events.values() {
            if event.world_id != self.world.id {
                return Err(LinkError::ForeignEvent(event.id));
            }
            if event.caused_by_ids.contains(&event.id) {
                return Err(LinkError::SelfReference(event.id));
            }
        }
        if let Some((_, cause)) = self.dangling_causes().first() {
            return Err(LinkError::ForeignEvent(*cause));
        }
        if let Some(path) = self.find_cycle() {
            if let (Some(&event), Some(&cause)) = (path.first(), path.last()) {
                return Err(LinkError::Cycle { event, cause, path });
            }
        }
        for story in self.stories.values() {
            if story.world_id != self.world.id {
                return Err(LinkError::UnknownStory(story.id));
            }
        }
        for beat in self.beats.values() {
            if !self.stories.contains_key(&beat.story_id) {
                return Err(LinkError::UnknownStory(beat.story_id));
            }
            if let Some(event) = beat.world_event_id {
                if !self.events.contains_key(&event) {
                    return Err(LinkError::ForeignEvent(event));
                }
            }
        }
        Ok(())
    }

    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::from_state(self)
    }
}

impl CausalEdges for WorldState {
    fn causes_of(&self, id: EventId) -> Option<&BTreeSet<EventId>> {
        self.events.get(&id).map(|e| &e.caused_by_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> WorldState {
        WorldState::new(
            WorldId::new(),
            UserId::new(),
            WorldFields {
                name: "Aster".into(),
                ..WorldFields::default()
            },
        )
    }

    fn event_at(state: &mut WorldState, t: f64) -> EventId {
        let id = EventId::new();
        state.add_event(
            id,
            EventFields {
                t,
                summary: format!("event at {t}"),
                ..EventFields::default()
            },
        );
        id
    }

    #[test]
    fn link_rejects_self_reference() {
        let mut s = state();
        let a = event_at(&mut s, 0.0);
        assert_eq!(s.link(a, a), Err(LinkError::SelfReference(a)));
    }

    #[test]
    fn link_rejects_closing_edge() {
        let mut s = state();
        let a = event_at(&mut s, 0.0);
        let b = event_at(&mut s, 1.0);
        let c = event_at(&mut s, 2.0);
        assert_eq!(s.link(b, a), Ok(true));
        assert_eq!(s.link(c, b), Ok(true));
        assert!(matches!(s.link(a, c), Err(LinkError::Cycle { .. })));
        assert_eq!(s.edge_count(), 2);
    }

    #[test]
    fn link_is_idempotent() {
        let mut s = state();
        let a = event_at(&mut s, 0.0);
        let b = event_at(&mut s, 1.0);
        assert_eq!(s.link(b, a), Ok(true));
        assert_eq!(s.link(b, a), Ok(false));
        assert_eq!(s.event(b).unwrap().caused_by_ids().len(), 1);
    }

    #[test]
    fn link_reports_foreign_cause() {
        let mut s = state();
        let a = event_at(&mut s, 0.0);
        let stranger = EventId::new();
        assert_eq!(s.link(a, stranger), Err(LinkError::ForeignEvent(stranger)));
        assert_eq!(s.link(stranger, a), Err(LinkError::UnknownEvent(stranger)));
    }

    #[test]
    fn unlink_absent_edge_is_noop() {
        let mut s = state();
        let a = event_at(&mut s, 0.0);
        let b = event_at(&mut s, 1.0);
        assert!(!s.unlink(b, a));
        assert_eq!(s.edge_count(), 0);
    }

    #[test]
    fn removing_event_clears_references() {
        let mut s = state();
        let a = event_at(&mut s, 0.0);
        let b = event_at(&mut s, 1.0);
        s.link(b, a).unwrap();
        let story = StoryId::new();
        s.add_story(story, StoryFields::default());
        let beat = BeatId::new();
        s.add_beat(beat, story, BeatFields::default()).unwrap();
        s.set_beat_event(beat, Some(a)).unwrap();

        s.remove_event(a);
        assert!(s.event(b).unwrap().caused_by_ids().is_empty());
        assert_eq!(s.beat(beat).unwrap().world_event_id(), None);
        assert!(s.dangling_causes().is_empty());
    }

    #[test]
    fn removing_story_cascades_to_beats() {
        let mut s = state();
        let story = StoryId::new();
        s.add_story(story, StoryFields::default());
        for i in 0..3 {
            s.add_beat(
                BeatId::new(),
                story,
                BeatFields {
                    order_index: i,
                    ..BeatFields::default()
                },
            )
            .unwrap();
        }
        assert_eq!(s.beat_count(), 3);
        s.remove_story(story);
        assert_eq!(s.beat_count(), 0);
    }

    #[test]
    fn beats_come_back_in_order() {
        let mut s = state();
        let story = StoryId::new();
        s.add_story(story, StoryFields::default());
        for i in [2u32, 0, 1] {
            s.add_beat(
                BeatId::new(),
                story,
                BeatFields {
                    order_index: i,
                    ..BeatFields::default()
                },
            )
            .unwrap();
        }
        let order: Vec<u32> = s.beats_of(story).iter().map(|b| b.fields.order_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn beat_cannot_reference_foreign_event() {
        let mut s = state();
        let story = StoryId::new();
        s.add_story(story, StoryFields::default());
        let beat = BeatId::new();
        s.add_beat(beat, story, BeatFields::default()).unwrap();
        let stranger = EventId::new();
        assert_eq!(
            s.set_beat_event(beat, Some(stranger)),
            Err(LinkError::ForeignEvent(stranger))
        );
    }

    #[test]
    fn integrity_check_catches_injected_cycle() {
        let mut s = state();
        let a = event_at(&mut s, 0.0);
        let b = event_at(&mut s, 1.0);
        s.link(b, a).unwrap();
        assert_eq!(s.check_integrity(), Ok(()));

        // Bypass `link` the way a tampered image would.
        s.events.get_mut(&a).unwrap().caused_by_ids.insert(b);
        match s.check_integrity() {
            Err(LinkError::Cycle { event, cause, path }) => {
                assert_eq!(path.len(), 2);
                assert!(path.contains(&a) && path.contains(&b));
                assert_eq!(Some(&event), path.first());
                assert_eq!(Some(&cause), path.last());
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn beat_requires_known_story() {
        let mut s = state();
        let story = StoryId::new();
        assert!(matches!(
            s.add_beat(BeatId::new(), story, BeatFields::default()),
            Err(LinkError::UnknownStory(_))
        ));
    }
}
