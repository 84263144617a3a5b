//! World kernel: the per-World aggregate that owns events, stories and beats,
//! plus the causal dependency graph over events.
//!
//! # Invariants
//! - Every cause listed by an event belongs to the same World.
//! - The causal graph is acyclic; self-loops are rejected.
//! - All edge mutations flow through [`WorldState::link`] and friends.

pub mod cycle;
pub mod graph;
pub mod world;

pub use cycle::{CausalEdges, cycle_path, find_cycle, would_create_cycle};
pub use graph::{DependencyEdge, DependencyGraph, EventNode};
pub use world::{
    BeatFields, EventFields, LinkError, Story, StoryBeat, StoryFields, World, WorldEvent,
    WorldFields, WorldState,
};
