//! Read-only view of the causal graph for visualization.

use serde::{Deserialize, Serialize};
use worldgraph_common::{EventId, EventType};

use crate::world::WorldState;

/// Summary of an event as a graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNode {
    pub id: EventId,
    pub t: f64,
    pub label_time: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub summary: String,
}

/// `event_id` is caused by `cause_id`. Arrows point from effect to cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub event_id: EventId,
    pub cause_id: EventId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<EventNode>,
    pub edges: Vec<DependencyEdge>,
}

impl DependencyGraph {
    /// Nodes in timeline order; edges sorted by (event, cause).
    pub fn from_state(state: &WorldState) -> Self {
        let events = state.events_by_time();
        let nodes = events
            .iter()
            .map(|e| EventNode {
                id: e.id,
                t: e.fields.t,
                label_time: e.fields.label_time.clone(),
                event_type: e.fields.event_type,
                summary: e.fields.summary.clone(),
            })
            .collect();
        let mut edges: Vec<DependencyEdge> = events
            .iter()
            .flat_map(|e| {
                e.caused_by_ids().iter().map(|cause| DependencyEdge {
                    event_id: e.id,
                    cause_id: *cause,
                })
            })
            .collect();
        edges.sort();
        Self { nodes, edges }
    }
}
