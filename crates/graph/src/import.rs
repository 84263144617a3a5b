//! Import and duplicate: rebuild a World under fresh ids.
//!
//! Both run the same two passes over a [`Snapshot`] inside the transaction
//! that creates the new World:
//!
//! 1. Create every event, story and beat with a new id and no relational
//!    fields, recording `old id -> new id`.
//! 2. Translate each `caused_by_ids` entry and each beat's `world_event_id`
//!    through that map and attach it through the validated edge path.
//!
//! Order inside the payload does not matter because nothing is linked until
//! every entity exists. Any error discards the whole World.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;
use worldgraph_common::{BeatId, EventId, StoryId, UserId, WorldId};
use worldgraph_persist::{Snapshot, Transaction};

use crate::config::ImportLimits;
use crate::error::{GraphError, Resource};
use crate::store::{GraphStore, attach_beat_event, attach_cause};

/// Lifecycle of one import or duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Idle,
    Validating,
    Creating,
    Relinking,
    Committed,
    RolledBack,
}

impl ImportPhase {
    pub fn can_advance_to(self, next: ImportPhase) -> bool {
        use ImportPhase::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Creating)
                | (Creating, Relinking)
                | (Relinking, Committed)
                | (Validating | Creating | Relinking, RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ImportPhase::Committed | ImportPhase::RolledBack)
    }
}

/// What an import or duplicate produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub world_id: WorldId,
    pub events: usize,
    pub edges: usize,
    pub stories: usize,
    pub beats: usize,
    pub beat_links: usize,
    /// Size of the `old id -> new id` table built by the create pass.
    pub mapped_ids: usize,
    pub phase: ImportPhase,
}

struct ImportRun {
    phase: ImportPhase,
}

impl ImportRun {
    fn new() -> Self {
        Self {
            phase: ImportPhase::Idle,
        }
    }

    fn advance(&mut self, next: ImportPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal import transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::debug!(from = ?self.phase, to = ?next, "import phase");
        self.phase = next;
    }
}

/// Transient `old id -> new id` table for one run.
#[derive(Default)]
struct IdMap {
    events: HashMap<EventId, EventId>,
    stories: HashMap<StoryId, StoryId>,
    beats: HashMap<BeatId, BeatId>,
}

impl IdMap {
    fn event(&self, old: EventId) -> Result<EventId, GraphError> {
        self.events
            .get(&old)
            .copied()
            .ok_or_else(|| GraphError::DanglingReference {
                kind: "event",
                id: old.to_string(),
            })
    }

    fn len(&self) -> usize {
        self.events.len() + self.stories.len() + self.beats.len()
    }
}

/// Counts from the create and relink passes.
#[derive(Default)]
struct Tally {
    edges: usize,
    beats: usize,
    beat_links: usize,
}

/// Output of the create pass: the id map plus beat references still to be
/// translated.
#[derive(Default)]
struct Created {
    map: IdMap,
    beat_links: Vec<(BeatId, EventId)>,
    tally: Tally,
}

impl GraphStore {
    /// Create a new World for `caller` from a JSON snapshot payload.
    pub fn import_json(&self, caller: UserId, payload: &[u8]) -> Result<ImportReport, GraphError> {
        let snapshot = Snapshot::from_json_bytes(payload, self.config().limits.max_payload_bytes)
            .inspect_err(|err| tracing::debug!(error = %err, "snapshot payload rejected"))?;
        self.import_snapshot(caller, &snapshot)
    }

    /// Create a new World for `caller` from a parsed snapshot.
    pub fn import_snapshot(
        &self,
        caller: UserId,
        snapshot: &Snapshot,
    ) -> Result<ImportReport, GraphError> {
        let report = self.rebuild(caller, snapshot)?;
        tracing::info!(
            world = %report.world_id,
            events = report.events,
            edges = report.edges,
            stories = report.stories,
            beats = report.beats,
            "world imported"
        );
        Ok(report)
    }

    /// Clone a live World into a new World with disjoint ids.
    ///
    /// The source World's write lock is held for the whole operation so the
    /// copy reflects exactly one committed state.
    pub fn duplicate(&self, caller: UserId, world: WorldId) -> Result<ImportReport, GraphError> {
        let report = self.database().read_world_locked(world, |state| {
            if state.owner() != caller {
                return Err(GraphError::NotFound(Resource::World(world)));
            }
            let snapshot = Snapshot::capture(state, chrono::Utc::now());
            self.rebuild(caller, &snapshot)
        })??;
        tracing::info!(
            source = %world,
            world = %report.world_id,
            events = report.events,
            edges = report.edges,
            "world duplicated"
        );
        Ok(report)
    }

    fn rebuild(&self, caller: UserId, snapshot: &Snapshot) -> Result<ImportReport, GraphError> {
        let mut run = ImportRun::new();
        run.advance(ImportPhase::Validating);
        if let Err(err) = validate(snapshot, &self.config().limits) {
            run.advance(ImportPhase::RolledBack);
            log_abort(&err);
            return Err(err);
        }

        let created = self
            .database()
            .create_world(caller, snapshot.world.clone(), |tx| {
                run.advance(ImportPhase::Creating);
                let mut created = create_pass(tx, snapshot)?;
                run.advance(ImportPhase::Relinking);
                relink_pass(tx, caller, snapshot, &mut created)?;
                Ok::<_, GraphError>(created)
            });

        match created {
            Ok((world_id, created)) => {
                run.advance(ImportPhase::Committed);
                Ok(ImportReport {
                    world_id,
                    events: snapshot.event_count(),
                    edges: created.tally.edges,
                    stories: snapshot.story_count(),
                    beats: created.tally.beats,
                    beat_links: created.tally.beat_links,
                    mapped_ids: created.map.len(),
                    phase: run.phase,
                })
            }
            Err(err) => {
                run.advance(ImportPhase::RolledBack);
                log_abort(&err);
                Err(err)
            }
        }
    }
}

fn log_abort(err: &GraphError) {
    if err.is_validation() {
        tracing::debug!(reason = err.reason(), error = %err, "import rejected");
    } else {
        tracing::warn!(reason = err.reason(), error = %err, "import aborted and rolled back");
    }
}

/// Limits and id uniqueness, checked before anything is written.
fn validate(snapshot: &Snapshot, limits: &ImportLimits) -> Result<(), GraphError> {
    snapshot.check_version()?;
    check_limit("events", snapshot.event_count(), limits.max_events)?;
    check_limit("stories", snapshot.story_count(), limits.max_stories)?;
    check_limit("beats", snapshot.beat_count(), limits.max_beats)?;

    ensure_unique("event", snapshot.world_events.iter().map(|e| e.id))?;
    ensure_unique("story", snapshot.stories.iter().filter_map(|s| s.id))?;
    ensure_unique(
        "beat",
        snapshot
            .stories
            .iter()
            .flat_map(|s| s.beats.iter().filter_map(|b| b.id)),
    )?;
    Ok(())
}

fn check_limit(kind: &'static str, count: usize, limit: usize) -> Result<(), GraphError> {
    if count > limit {
        return Err(GraphError::TooManyEntities { kind, count, limit });
    }
    Ok(())
}

fn ensure_unique<T>(kind: &'static str, ids: impl Iterator<Item = T>) -> Result<(), GraphError>
where
    T: Eq + Hash + Display,
{
    let mut seen = HashSet::new();
    for id in ids {
        if seen.contains(&id) {
            return Err(GraphError::DuplicateId {
                kind,
                id: id.to_string(),
            });
        }
        seen.insert(id);
    }
    Ok(())
}

/// Pass 1: rows with fresh ids and no relational fields.
fn create_pass(tx: &mut Transaction<'_>, snapshot: &Snapshot) -> Result<Created, GraphError> {
    let mut created = Created::default();

    for event in &snapshot.world_events {
        let id = EventId::new();
        tx.add_event(id, event.fields.clone());
        created.map.events.insert(event.id, id);
    }
    for story in &snapshot.stories {
        let story_id = StoryId::new();
        tx.add_story(story_id, story.fields.clone());
        if let Some(old) = story.id {
            created.map.stories.insert(old, story_id);
        }
        for beat in &story.beats {
            let beat_id = BeatId::new();
            tx.add_beat(beat_id, story_id, beat.fields.clone())
                .map_err(|_| GraphError::NotFound(Resource::Story(story_id)))?;
            if let Some(old) = beat.id {
                created.map.beats.insert(old, beat_id);
            }
            if let Some(old_event) = beat.world_event_id {
                created.beat_links.push((beat_id, old_event));
            }
            created.tally.beats += 1;
        }
    }
    tracing::debug!(
        events = created.map.events.len(),
        stories = created.map.stories.len(),
        beats = created.tally.beats,
        "create pass finished"
    );
    Ok(created)
}

/// Pass 2: translate references and attach them through the validated paths.
fn relink_pass(
    tx: &mut Transaction<'_>,
    owner: UserId,
    snapshot: &Snapshot,
    created: &mut Created,
) -> Result<(), GraphError> {
    for event in &snapshot.world_events {
        let new_event = created.map.event(event.id)?;
        for &cause in &event.caused_by_ids {
            if attach_cause(tx, owner, new_event, created.map.event(cause)?)? {
                created.tally.edges += 1;
            }
        }
    }
    for &(beat, old_event) in &created.beat_links {
        attach_beat_event(tx, owner, beat, created.map.event(old_event)?)?;
        created.tally.beat_links += 1;
    }
    tracing::debug!(
        edges = created.tally.edges,
        beat_links = created.tally.beat_links,
        "relink pass finished"
    );
    Ok(())
}
