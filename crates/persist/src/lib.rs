//! Persistence for the world event graph: a transactional in-process store,
//! durable database images, and the portable snapshot format.
//!
//! # Invariants
//! - Mutations of one World are serialized by a per-World lock and applied to a
//!   private copy; nothing is visible to readers until commit.
//! - Reads hand out immutable, internally consistent World states.
//! - Database images are content-addressed and verified before use.

pub mod db;
pub mod snapshot;
pub mod store;

pub use db::{Database, DatabaseImage, PersistError, Transaction};
pub use snapshot::{
    SNAPSHOT_VERSION, SUPPORTED_VERSIONS, Snapshot, SnapshotBeat, SnapshotError, SnapshotEvent,
    SnapshotStory,
};
pub use store::{DatabaseStore, ImageRecord, StoreError, StoreMeta};
