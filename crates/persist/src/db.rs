//! In-process transactional store for Worlds.
//!
//! Each World is stored as an immutable [`WorldState`] behind an `Arc`. A write
//! transaction takes the World's lock, clones the committed state, mutates the
//! clone and swaps it in on success. Dropping the transaction without a
//! successful result discards every change. Readers never block on writers
//! and always see a fully committed state.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use worldgraph_common::{EventId, UserId, WorldId};
use worldgraph_kernel::{LinkError, WorldFields, WorldState};

/// Current database image schema.
pub const IMAGE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("world {0} not found")]
    WorldNotFound(WorldId),
    #[error("world {world} failed integrity check: {source}")]
    CorruptWorld {
        world: WorldId,
        #[source]
        source: LinkError,
    },
    #[error("event {event} appears in worlds {first} and {second}")]
    DuplicateEvent {
        event: EventId,
        first: WorldId,
        second: WorldId,
    },
    #[error("image schema v{found} is not supported (expected v{expected})")]
    SchemaMismatch { found: u32, expected: u32 },
}

/// Every World in the database, in id order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseImage {
    pub schema_version: u32,
    pub worlds: Vec<WorldState>,
}

#[derive(Debug, Default)]
struct Tables {
    worlds: HashMap<WorldId, Arc<WorldState>>,
    /// Which World each event belongs to. Used for cross-World checks.
    event_owner: HashMap<EventId, WorldId>,
}

impl Tables {
    fn install(&mut self, state: WorldState) {
        let id = state.id();
        if let Some(old) = self.worlds.get(&id) {
            for event in old.event_ids() {
                self.event_owner.remove(&event);
            }
        }
        for event in state.event_ids() {
            self.event_owner.insert(event, id);
        }
        self.worlds.insert(id, Arc::new(state));
    }
}

#[derive(Debug, Default)]
pub struct Database {
    tables: RwLock<Tables>,
    locks: Mutex<HashMap<WorldId, Arc<Mutex<()>>>>,
}

/// A write transaction scoped to one World.
///
/// Dereferences to the working copy of the World's state.
pub struct Transaction<'a> {
    db: &'a Database,
    state: WorldState,
}

impl Transaction<'_> {
    /// World and owner of an event anywhere in the database, as of the last commit.
    pub fn locate_event(&self, id: EventId) -> Option<(WorldId, UserId)> {
        if self.state.contains_event(id) {
            return Some((self.state.id(), self.state.owner()));
        }
        self.db.locate_event(id)
    }
}

impl Deref for Transaction<'_> {
    type Target = WorldState;

    fn deref(&self) -> &WorldState {
        &self.state
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut WorldState {
        &mut self.state
    }
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a database from an image, re-checking every World's invariants.
    pub fn from_image(image: DatabaseImage) -> Result<Self, PersistError> {
        if image.schema_version != IMAGE_SCHEMA_VERSION {
            return Err(PersistError::SchemaMismatch {
                found: image.schema_version,
                expected: IMAGE_SCHEMA_VERSION,
            });
        }
        let mut tables = Tables::default();
        for state in image.worlds {
            state
                .check_integrity()
                .map_err(|source| PersistError::CorruptWorld {
                    world: state.id(),
                    source,
                })?;
            for event in state.event_ids() {
                if let Some(&first) = tables.event_owner.get(&event) {
                    return Err(PersistError::DuplicateEvent {
                        event,
                        first,
                        second: state.id(),
                    });
                }
            }
            tables.install(state);
        }
        tracing::debug!(worlds = tables.worlds.len(), "database restored from image");
        Ok(Self {
            tables: RwLock::new(tables),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Copy of every committed World.
    pub fn image(&self) -> DatabaseImage {
        let tables = self.tables.read();
        let mut worlds: Vec<WorldState> = tables.worlds.values().map(|w| (**w).clone()).collect();
        worlds.sort_by_key(|w| w.id());
        DatabaseImage {
            schema_version: IMAGE_SCHEMA_VERSION,
            worlds,
        }
    }

    pub fn world_count(&self) -> usize {
        self.tables.read().worlds.len()
    }

    /// Ids of every World owned by `user`, sorted.
    pub fn worlds_of(&self, user: UserId) -> Vec<WorldId> {
        let tables = self.tables.read();
        let mut ids: Vec<WorldId> = tables
            .worlds
            .values()
            .filter(|w| w.owner() == user)
            .map(|w| w.id())
            .collect();
        ids.sort();
        ids
    }

    /// The committed state of a World. The returned value never changes.
    pub fn read_world(&self, id: WorldId) -> Option<Arc<WorldState>> {
        self.tables.read().worlds.get(&id).cloned()
    }

    pub fn locate_event(&self, id: EventId) -> Option<(WorldId, UserId)> {
        let tables = self.tables.read();
        let world = *tables.event_owner.get(&id)?;
        let owner = tables.worlds.get(&world)?.owner();
        Some((world, owner))
    }

    /// Read a World while holding its write lock, so no writer can commit to
    /// it until `f` returns.
    pub fn read_world_locked<R>(
        &self,
        id: WorldId,
        f: impl FnOnce(&WorldState) -> R,
    ) -> Result<R, PersistError> {
        let lock = self.world_lock(id).ok_or(PersistError::WorldNotFound(id))?;
        let _guard = lock.lock();
        let state = self.read_world(id).ok_or(PersistError::WorldNotFound(id))?;
        Ok(f(&state))
    }

    /// Run `f` against a private copy of the World and commit it if `f` succeeds.
    pub fn transact<T, E>(
        &self,
        id: WorldId,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<PersistError>,
    {
        let lock = self.world_lock(id).ok_or(PersistError::WorldNotFound(id))?;
        let _guard = lock.lock();
        let base = self.read_world(id).ok_or(PersistError::WorldNotFound(id))?;
        let mut tx = Transaction {
            db: self,
            state: (*base).clone(),
        };
        let out = f(&mut tx)?;
        self.tables.write().install(tx.state);
        tracing::debug!(world = %id, "transaction committed");
        Ok(out)
    }

    /// Build a new World inside a transaction. The World becomes visible only
    /// when `f` succeeds; on error nothing is left behind.
    pub fn create_world<T, E>(
        &self,
        owner: UserId,
        fields: WorldFields,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<(WorldId, T), E> {
        let id = WorldId::new();
        let mut tx = Transaction {
            db: self,
            state: WorldState::new(id, owner, fields),
        };
        let out = f(&mut tx)?;
        self.tables.write().install(tx.state);
        tracing::debug!(world = %id, %owner, "world created");
        Ok((id, out))
    }

    /// Remove a World together with every event, story and beat it owns.
    pub fn delete_world(&self, id: WorldId) -> Result<WorldState, PersistError> {
        let lock = self.world_lock(id).ok_or(PersistError::WorldNotFound(id))?;
        let _guard = lock.lock();
        let removed = {
            let mut tables = self.tables.write();
            let removed = tables
                .worlds
                .remove(&id)
                .ok_or(PersistError::WorldNotFound(id))?;
            for event in removed.event_ids() {
                tables.event_owner.remove(&event);
            }
            removed
        };
        self.locks.lock().remove(&id);
        tracing::debug!(world = %id, events = removed.event_count(), "world deleted");
        Ok(Arc::unwrap_or_clone(removed))
    }

    /// Lock for an existing World. Unknown ids get `None` and leave no entry
    /// behind; callers still re-read the World under the lock since it may be
    /// deleted in between.
    fn world_lock(&self, id: WorldId) -> Option<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(&id) {
            return Some(lock.clone());
        }
        if !self.tables.read().worlds.contains_key(&id) {
            return None;
        }
        Some(locks.entry(id).or_default().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldgraph_kernel::EventFields;

    fn fields(name: &str) -> WorldFields {
        WorldFields {
            name: name.into(),
            ..WorldFields::default()
        }
    }

    fn seeded(db: &Database, owner: UserId) -> (WorldId, EventId, EventId) {
        let (a, b) = (EventId::new(), EventId::new());
        let (id, ()) = db
            .create_world(owner, fields("seeded"), |tx| {
                tx.add_event(a, EventFields::default());
                tx.add_event(b, EventFields::default());
                Ok::<_, PersistError>(())
            })
            .unwrap();
        (id, a, b)
    }

    #[test]
    fn create_world_commits_on_success() {
        let db = Database::new();
        let owner = UserId::new();
        let (id, a, _) = seeded(&db, owner);
        assert_eq!(db.world_count(), 1);
        assert_eq!(db.worlds_of(owner), vec![id]);
        assert_eq!(db.locate_event(a), Some((id, owner)));
    }

    #[test]
    fn create_world_leaves_nothing_on_error() {
        let db = Database::new();
        let result: Result<(WorldId, ()), &str> =
            db.create_world(UserId::new(), fields("doomed"), |tx| {
                tx.add_event(EventId::new(), EventFields::default());
                Err("abort")
            });
        assert!(result.is_err());
        assert_eq!(db.world_count(), 0);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let db = Database::new();
        let (id, a, b) = seeded(&db, UserId::new());

        let result: Result<(), PersistError> = db.transact(id, |tx| {
            tx.link(b, a).unwrap();
            Err(PersistError::WorldNotFound(id))
        });
        assert!(result.is_err());
        assert_eq!(db.read_world(id).unwrap().edge_count(), 0);
    }

    #[test]
    fn readers_keep_their_view_across_commits() {
        let db = Database::new();
        let (id, a, b) = seeded(&db, UserId::new());
        let before = db.read_world(id).unwrap();

        db.transact(id, |tx| tx.link(b, a).map_err(|_| PersistError::WorldNotFound(id)))
            .unwrap();

        assert_eq!(before.edge_count(), 0);
        assert_eq!(db.read_world(id).unwrap().edge_count(), 1);
    }

    #[test]
    fn transact_on_missing_world_fails() {
        let db = Database::new();
        let missing = WorldId::new();
        let result: Result<(), PersistError> = db.transact(missing, |_| Ok(()));
        assert!(matches!(result, Err(PersistError::WorldNotFound(id)) if id == missing));
    }

    #[test]
    fn unknown_worlds_leave_no_locks_behind() {
        let db = Database::new();
        for _ in 0..100 {
            let missing = WorldId::new();
            let _: Result<(), PersistError> = db.transact(missing, |_| Ok(()));
            assert!(db.read_world_locked(missing, |_| ()).is_err());
            assert!(db.delete_world(missing).is_err());
        }
        assert_eq!(db.locks.lock().len(), 0);

        let (world, _, _) = seeded(&db, UserId::new());
        db.transact(world, |_| Ok::<_, PersistError>(())).unwrap();
        assert_eq!(db.locks.lock().len(), 1);
        db.delete_world(world).unwrap();
        assert_eq!(db.locks.lock().len(), 0);
    }

    #[test]
    fn delete_world_drops_event_index() {
        let db = Database::new();
        let (id, a, _) = seeded(&db, UserId::new());
        let removed = db.delete_world(id).unwrap();
        assert_eq!(removed.event_count(), 2);
        assert_eq!(db.locate_event(a), None);
        assert!(db.read_world(id).is_none());
        assert!(matches!(db.delete_world(id), Err(PersistError::WorldNotFound(_))));
    }

    #[test]
    fn image_roundtrip_restores_index() {
        let db = Database::new();
        let owner = UserId::new();
        let (id, a, b) = seeded(&db, owner);
        db.transact(id, |tx| tx.link(b, a).map_err(|_| PersistError::WorldNotFound(id)))
            .unwrap();

        let restored = Database::from_image(db.image()).unwrap();
        assert_eq!(restored.locate_event(b), Some((id, owner)));
        assert_eq!(restored.read_world(id).unwrap().edge_count(), 1);
    }

    #[test]
    fn image_schema_mismatch_is_rejected() {
        let mut image = Database::new().image();
        image.schema_version = 999;
        assert!(matches!(
            Database::from_image(image),
            Err(PersistError::SchemaMismatch { found: 999, .. })
        ));
    }
}
