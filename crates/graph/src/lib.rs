//! Operations on a World's causal event graph.
//!
//! [`GraphStore`] is the only way edges are added or removed, and every write
//! runs inside one World transaction so the cycle check and the edge write are
//! atomic with respect to other writers. Export reads one committed state;
//! import and duplicate rebuild a World with fresh ids in two passes inside the
//! transaction that creates it.

pub mod config;
pub mod error;
pub mod export;
pub mod import;
pub mod store;

pub use config::{ConfigError, GraphConfig, ImportLimits};
pub use error::{GraphError, Resource};
pub use import::{ImportPhase, ImportReport};
pub use store::{GraphStore, NewBeat, NewEvent};
