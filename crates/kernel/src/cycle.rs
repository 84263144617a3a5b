//! Cycle detection over the causal-predecessor relation.
//!
//! An edge `event -> cause` means `event` lists `cause` in its `caused_by_ids`.
//! Adding that edge closes a cycle exactly when `event` is already reachable from
//! `cause` by walking causes of causes.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use worldgraph_common::EventId;

/// Read access to the causal edge set of one World.
pub trait CausalEdges {
    /// Direct causes of `id`, or `None` if the event is unknown.
    fn causes_of(&self, id: EventId) -> Option<&BTreeSet<EventId>>;
}

impl CausalEdges for HashMap<EventId, BTreeSet<EventId>> {
    fn causes_of(&self, id: EventId) -> Option<&BTreeSet<EventId>> {
        self.get(&id)
    }
}

/// Whether adding `event -> cause` would make the graph cyclic.
///
/// Self-loops short-circuit to `true`. Otherwise O(V + E).
pub fn would_create_cycle<G: CausalEdges + ?Sized>(edges: &G, event: EventId, cause: EventId) -> bool {
    event == cause || cycle_path(edges, event, cause).is_some()
}

/// Breadth-first walk from `cause` through existing causes looking for `event`.
///
/// Returns the chain `cause, ..., event` that the new edge would close, or `None`
/// when `event` is unreachable. A self-loop yields `[event]`.
pub fn cycle_path<G: CausalEdges + ?Sized>(
    edges: &G,
    event: EventId,
    cause: EventId,
) -> Option<Vec<EventId>> {
    if event == cause {
        return Some(vec![event]);
    }

    let mut parent: HashMap<EventId, EventId> = HashMap::new();
    let mut visited: HashSet<EventId> = HashSet::from([cause]);
    let mut queue = VecDeque::from([cause]);

    while let Some(current) = queue.pop_front() {
        let Some(causes) = edges.causes_of(current) else {
            continue;
        };
        for &next in causes {
            if !visited.insert(next) {
                continue;
            }
            parent.insert(next, current);
            if next == event {
                let mut path = vec![event];
                let mut cursor = event;
                while let Some(&prev) = parent.get(&cursor) {
                    path.push(prev);
                    cursor = prev;
                }
                path.reverse();
                tracing::debug!(%event, %cause, hops = path.len(), "candidate edge closes a cycle");
                return Some(path);
            }
            queue.push_back(next);
        }
    }
    None
}

/// Find any cycle in a whole edge set, returned as the list of events on it.
///
/// Used to verify state that did not arrive through [`would_create_cycle`],
/// such as a loaded database image.
pub fn find_cycle<G, I>(edges: &G, nodes: I) -> Option<Vec<EventId>>
where
    G: CausalEdges + ?Sized,
    I: IntoIterator<Item = EventId>,
{
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Active,
        Done,
    }

    let mut marks: HashMap<EventId, Mark> = HashMap::new();

    for root in nodes {
        if marks.contains_key(&root) {
            continue;
        }
        // Iterative DFS; each frame holds the node and its remaining causes.
        let mut stack: Vec<(EventId, Vec<EventId>)> = Vec::new();
        marks.insert(root, Mark::Active);
        stack.push((root, children(edges, root)));

        while let Some((node, pending)) = stack.last_mut() {
            let node = *node;
            match pending.pop() {
                Some(next) => match marks.get(&next) {
                    Some(Mark::Active) => {
                        let start = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                        return Some(stack[start..].iter().map(|(n, _)| *n).collect());
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::Active);
                        stack.push((next, children(edges, next)));
                    }
                },
                None => {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                }
            }
        }
    }
    None
}

fn children<G: CausalEdges + ?Sized>(edges: &G, id: EventId) -> Vec<EventId> {
    edges
        .causes_of(id)
        .map(|c| c.iter().copied().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn graph(n: usize) -> (Vec<EventId>, HashMap<EventId, BTreeSet<EventId>>) {
        let ids: Vec<EventId> = (0..n).map(|_| EventId::new()).collect();
        let edges = ids.iter().map(|id| (*id, BTreeSet::new())).collect();
        (ids, edges)
    }

    fn link(edges: &mut HashMap<EventId, BTreeSet<EventId>>, event: EventId, cause: EventId) {
        edges.get_mut(&event).unwrap().insert(cause);
    }

    /// Naive reachability used as the oracle for the property test.
    fn reachable(edges: &HashMap<EventId, BTreeSet<EventId>>, from: EventId, to: EventId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if seen.insert(n) {
                stack.extend(edges[&n].iter().copied());
            }
        }
        false
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let (ids, edges) = graph(1);
        assert!(would_create_cycle(&edges, ids[0], ids[0]));
        assert_eq!(cycle_path(&edges, ids[0], ids[0]), Some(vec![ids[0]]));
    }

    #[test]
    fn chain_closing_edge_is_detected() {
        // B caused_by A, C caused_by B; A caused_by C would close the loop.
        let (ids, mut edges) = graph(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        link(&mut edges, b, a);
        link(&mut edges, c, b);

        assert!(would_create_cycle(&edges, a, c));
        assert_eq!(cycle_path(&edges, a, c), Some(vec![c, b, a]));
        assert!(!would_create_cycle(&edges, c, a));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let (ids, mut edges) = graph(4);
        link(&mut edges, ids[1], ids[0]);
        link(&mut edges, ids[2], ids[0]);
        link(&mut edges, ids[3], ids[1]);
        assert!(!would_create_cycle(&edges, ids[3], ids[2]));
        assert!(find_cycle(&edges, ids.iter().copied()).is_none());
    }

    #[test]
    fn unknown_cause_terminates() {
        let (ids, edges) = graph(1);
        assert!(!would_create_cycle(&edges, ids[0], EventId::new()));
    }

    #[test]
    fn find_cycle_reports_members() {
        let (ids, mut edges) = graph(3);
        link(&mut edges, ids[0], ids[1]);
        link(&mut edges, ids[1], ids[2]);
        link(&mut edges, ids[2], ids[0]);
        let cycle = find_cycle(&edges, ids.iter().copied()).unwrap();
        assert_eq!(cycle.len(), 3);
        for id in &ids {
            assert!(cycle.contains(id));
        }
    }

    proptest! {
        /// Random DAG (edges only point from higher to lower index) plus a random
        /// candidate edge: detection must agree with plain reachability.
        #[test]
        fn detection_matches_reachability(
            n in 2usize..24,
            raw_edges in proptest::collection::vec((0usize..24, 0usize..24), 0..60),
            candidate in (0usize..24, 0usize..24),
        ) {
            let (ids, mut edges) = graph(n);
            for (x, y) in raw_edges {
                let (x, y) = (x % n, y % n);
                if x > y {
                    link(&mut edges, ids[x], ids[y]);
                }
            }
            let (event, cause) = (ids[candidate.0 % n], ids[candidate.1 % n]);
            let expected = event == cause || reachable(&edges, cause, event);
            prop_assert_eq!(would_create_cycle(&edges, event, cause), expected);
            prop_assert!(find_cycle(&edges, ids.iter().copied()).is_none());
        }
    }
}
