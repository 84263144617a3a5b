use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use worldgraph_common::{EventId, UserId, WorldId};
use worldgraph_graph::{GraphConfig, GraphError, GraphStore, NewEvent};
use worldgraph_kernel::{EventFields, WorldFields, WorldState};
use worldgraph_persist::Database;

fn world_with_events(n: usize) -> (GraphStore, UserId, WorldId, Vec<EventId>) {
    let store = GraphStore::new(Arc::new(Database::new()), GraphConfig::default());
    let user = UserId::new();
    let world = store.create_world(user, WorldFields::default()).unwrap();
    let ids = (0..n)
        .map(|i| {
            store
                .create_event(
                    user,
                    world,
                    NewEvent {
                        fields: EventFields {
                            t: i as f64,
                            ..EventFields::default()
                        },
                        caused_by_ids: vec![],
                    },
                )
                .unwrap()
        })
        .collect();
    (store, user, world, ids)
}

/// Two writers each try to add one half of a 2-cycle at the same moment.
/// Exactly one may win.
#[test]
fn racing_writers_cannot_commit_a_cycle() {
    for _ in 0..50 {
        let (store, user, world, ids) = world_with_events(2);
        let (a, b) = (ids[0], ids[1]);
        let barrier = Barrier::new(2);

        let (first, second) = std::thread::scope(|scope| {
            let h1 = scope.spawn(|| {
                barrier.wait();
                store.add_dependency(user, world, a, b)
            });
            let h2 = scope.spawn(|| {
                barrier.wait();
                store.add_dependency(user, world, b, a)
            });
            (h1.join().unwrap(), h2.join().unwrap())
        });

        assert!(first.is_ok() != second.is_ok(), "exactly one edge must win");
        let loser = if first.is_err() { first } else { second };
        assert!(matches!(loser, Err(GraphError::Cycle { .. })));
        let state = store.world(user, world).unwrap();
        assert_eq!(state.edge_count(), 1);
        assert!(state.find_cycle().is_none());
    }
}

/// A longer race: many threads adding edges around a ring. The committed
/// graph must stay acyclic whatever the interleaving.
#[test]
fn ring_race_stays_acyclic() {
    let (store, user, world, ids) = world_with_events(8);
    std::thread::scope(|scope| {
        for i in 0..ids.len() {
            let (store, ids) = (&store, &ids);
            scope.spawn(move || {
                let next = ids[(i + 1) % ids.len()];
                let _ = store.add_dependency(user, world, ids[i], next);
            });
        }
    });
    let state = store.world(user, world).unwrap();
    assert_eq!(state.edge_count(), ids.len() - 1);
    assert!(state.find_cycle().is_none());
}

/// Plain depth-first walk over `caused_by_ids`, kept apart from the kernel's
/// detector so the two can disagree.
fn reaches(state: &WorldState, from: EventId, to: EventId) -> bool {
    let mut seen = HashSet::new();
    let mut stack = vec![from];
    while let Some(id) = stack.pop() {
        if id == to {
            return true;
        }
        if seen.insert(id) {
            if let Some(event) = state.event(id) {
                stack.extend(event.caused_by_ids().iter().copied());
            }
        }
    }
    false
}

#[derive(Debug, Clone)]
enum Op {
    Add(usize, usize),
    Remove(usize, usize),
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(
        prop_oneof![
            3 => (0usize..10, 0usize..10).prop_map(|(x, y)| Op::Add(x, y)),
            1 => (0usize..10, 0usize..10).prop_map(|(x, y)| Op::Remove(x, y)),
        ],
        0..80,
    )
}

proptest! {
    /// Any sequence of accepted adds and removes leaves an acyclic graph, and
    /// an add is rejected exactly when the edge would close a cycle.
    #[test]
    fn accepted_mutations_never_form_a_cycle(ops in ops()) {
        let (store, user, world, ids) = world_with_events(10);
        for op in ops {
            match op {
                Op::Add(x, y) => {
                    let before = store.world(user, world).unwrap();
                    let closes = x == y || reaches(&before, ids[y], ids[x]);
                    let result = store.add_dependency(user, world, ids[x], ids[y]);
                    match result {
                        Ok(_) => prop_assert!(!closes),
                        Err(GraphError::SelfReference(_)) => prop_assert_eq!(x, y),
                        Err(GraphError::Cycle { .. }) => prop_assert!(closes),
                        Err(other) => prop_assert!(false, "unexpected error {other}"),
                    }
                }
                Op::Remove(x, y) => {
                    prop_assert!(store.remove_dependency(user, world, ids[x], ids[y]).is_ok());
                }
            }
            prop_assert!(store.world(user, world).unwrap().find_cycle().is_none());
        }
    }
}
