use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use dstate_core::{
    key, AcquireOptions, Context, ContextConfig, DStateError, Persister, PersisterCreator,
    Reference, Result, State, StateMachine, StateSnapshot,
};
use dstate_drivers::{
    route_by_kind, DocumentPersisterCreator, DocumentRoute, InMemoryDocumentStore,
    InMemoryLockCreator, InMemoryPersisterCreator, NoLockCreator,
};
use serde_json::json;

#[derive(Debug)]
struct TrafficLight {
    state: State,
}

impl TrafficLight {
    fn cycle(&mut self) -> Result<()> {
        let next = match self.state.state() {
            "green" => "yellow",
            "yellow" => "red",
            "red" => "green",
            other => return Err(DStateError::Machine(format!("unknown state {other}"))),
        };
        self.state.set_state(next)
    }

    fn current(&self) -> &str {
        self.state.state()
    }

    fn neighbour_ids(&self) -> Vec<i64> {
        self.state
            .attr("neighbour_ids")
            .and_then(|ids| ids.as_array())
            .map(|ids| ids.iter().filter_map(|id| id.as_i64()).collect())
            .unwrap_or_default()
    }
}

impl StateMachine for TrafficLight {
    const KIND: &'static str = "traffic_light";
    const INITIAL: &'static str = "green";

    fn from_state(state: State) -> Result<Self> {
        Ok(Self { state })
    }

    fn state(&self) -> &State {
        &self.state
    }

    fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct World {
    root: Arc<Context>,
    persisters: Arc<InMemoryPersisterCreator>,
}

fn world() -> World {
    init_tracing();
    let root = Context::root(
        "root",
        ContextConfig::new()
            .with_lock_name("lock")
            .with_persister_name("default")
            .with_standard_timing(),
    );
    let persisters = Arc::new(InMemoryPersisterCreator::new());
    root.lock_creators()
        .register("lock", Arc::new(InMemoryLockCreator::new()));
    root.lock_creators()
        .register("none", Arc::new(NoLockCreator::new()));
    root.persister_creators()
        .register("default", persisters.clone());
    World { root, persisters }
}

fn light(id: i64) -> dstate_core::ReferenceKey {
    key([("id", id)])
}

#[test]
fn traffic_light_cycles_across_acquisitions() {
    let w = world();

    for expected in ["green", "yellow", "red", "green"] {
        let mut machine = w
            .root
            .acquire_machine::<TrafficLight>(light(1), AcquireOptions::new())
            .unwrap();
        assert_eq!(machine.current(), expected);
        machine.cycle().unwrap();
    }

    let stored = w
        .persisters
        .snapshot(&Reference::new("traffic_light", [("id", 1)]))
        .unwrap();
    assert_eq!(stored.state, "yellow");
}

#[test]
fn read_only_acquisition_rejects_transition() {
    let w = world();
    let mut machine = w
        .root
        .acquire_machine::<TrafficLight>(light(1), AcquireOptions::new().lock_name("none"))
        .unwrap();

    assert_eq!(machine.current(), "green");
    let err = machine.cycle().unwrap_err();
    assert!(matches!(err, DStateError::NotAllowedChange { .. }));
    assert_eq!(machine.current(), "green");
    assert!(w.persisters.is_empty());
}

#[test]
fn read_only_acquisition_does_not_block_writer() {
    let w = world();
    let mut writer = w
        .root
        .acquire_machine::<TrafficLight>(light(1), AcquireOptions::new())
        .unwrap();
    let reader = w
        .root
        .acquire_machine::<TrafficLight>(light(1), AcquireOptions::new().lock_name("none"))
        .unwrap();

    writer.cycle().unwrap();
    assert_eq!(reader.current(), "green");
}

#[test]
fn second_exclusive_acquisition_sees_first_save() {
    let w = world();
    {
        let mut machine = w
            .root
            .acquire_machine::<TrafficLight>(light(1), AcquireOptions::new())
            .unwrap();
        machine.cycle().unwrap();
        assert_eq!(machine.current(), "yellow");
    }

    let mut machine = w
        .root
        .acquire_machine::<TrafficLight>(light(1), AcquireOptions::new())
        .unwrap();
    assert_eq!(machine.current(), "yellow");
    machine.cycle().unwrap();
    assert_eq!(machine.current(), "red");
}

#[test]
fn held_lock_times_out_second_acquirer() {
    let w = world();
    let _held = w
        .root
        .acquire_machine::<TrafficLight>(light(1), AcquireOptions::new())
        .unwrap();

    let err = w
        .root
        .acquire_machine::<TrafficLight>(
            light(1),
            AcquireOptions::new().lock_timeout(Duration::from_millis(20)),
        )
        .unwrap_err();
    assert!(err.is_lock_timeout());

    // Other ids are unaffected.
    w.root
        .acquire_machine::<TrafficLight>(light(2), AcquireOptions::new())
        .unwrap();
}

#[test]
fn child_context_drives_neighbours_from_attrs() {
    let w = world();
    let context = w
        .root
        .make_child_context(
            "context_name",
            ContextConfig::new().with_standard_timing(),
        )
        .unwrap();

    w.persisters
        .get_or_create(&Reference::new("traffic_light", [("id", 1)]))
        .unwrap()
        .save(&StateSnapshot::seeded("green").with_attr("neighbour_ids", json!([2, 3])))
        .unwrap();

    let mut machine = context
        .acquire_machine::<TrafficLight>(light(1), AcquireOptions::new())
        .unwrap();
    assert_eq!(machine.current(), "green");
    machine.cycle().unwrap();
    assert_eq!(machine.current(), "yellow");

    let mut neighbours = machine
        .neighbour_ids()
        .into_iter()
        .map(|id| context.acquire_machine::<TrafficLight>(light(id), AcquireOptions::new()))
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert_eq!(neighbours.len(), 2);

    for neighbour in &mut neighbours {
        neighbour.cycle().unwrap();
        assert_eq!(neighbour.current(), "yellow");
        neighbour.cycle().unwrap();
        assert_eq!(neighbour.current(), "red");
    }
}

#[test]
fn lapsed_lease_reports_expiry_after_takeover() {
    let w = world();
    let mut stale = w
        .root
        .acquire_machine::<TrafficLight>(
            light(1),
            AcquireOptions::new().lock_time(Duration::from_millis(10)),
        )
        .unwrap();

    let mut fresh = w
        .root
        .acquire_machine::<TrafficLight>(light(1), AcquireOptions::new())
        .unwrap();
    fresh.cycle().unwrap();

    let err = stale.cycle().unwrap_err();
    assert!(matches!(err, DStateError::LockExpired { .. }));
    assert_eq!(stale.current(), "green");

    // Releasing the stale guard leaves the new holder in charge.
    stale.release().unwrap();
    fresh.cycle().unwrap();
    assert_eq!(fresh.current(), "red");
}

#[test]
fn document_persister_upserts_by_key() {
    init_tracing();
    let store = Arc::new(InMemoryDocumentStore::new());
    let root = Context::root(
        "documents",
        ContextConfig::new()
            .with_lock_name("lock")
            .with_persister_name("documents")
            .with_standard_timing(),
    );
    root.lock_creators()
        .register("lock", Arc::new(InMemoryLockCreator::new()));
    root.persister_creators().register(
        "documents",
        Arc::new(DocumentPersisterCreator::new(store.clone(), route_by_kind("dstate"))),
    );

    for _ in 0..2 {
        root.with_machine::<TrafficLight, _, _>(light(1), AcquireOptions::new(), |m| m.cycle())
            .unwrap();
    }

    let docs = store.documents(&DocumentRoute::new("dstate", "traffic_light"));
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].get("id"), Some(&json!(1)));
    assert_eq!(docs[0].get("state"), Some(&json!("red")));
}

#[test]
fn concurrent_writers_serialise_on_the_lock() {
    let w = world();
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let root = Arc::clone(&w.root);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                root.with_machine::<TrafficLight, _, _>(
                    light(1),
                    AcquireOptions::new().lock_timeout(Duration::from_secs(10)),
                    |m| {
                        let count = m.state().attr("count").and_then(|c| c.as_i64()).unwrap_or(0);
                        m.state_mut().set_attr("count", count + 1)
                    },
                )
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let stored = w
        .persisters
        .snapshot(&Reference::new("traffic_light", [("id", 1)]))
        .unwrap();
    assert_eq!(stored.attr("count"), Some(&json!(threads)));
}

#[test]
fn closure_scope_unlocks_after_error() {
    let w = world();
    let err = w
        .root
        .with_machine::<TrafficLight, (), _>(light(1), AcquireOptions::new(), |_| {
            Err(DStateError::Machine("engine refused".into()))
        })
        .unwrap_err();
    assert!(matches!(err, DStateError::Machine(_)));

    w.root
        .acquire_machine::<TrafficLight>(
            light(1),
            AcquireOptions::new().lock_timeout(Duration::from_millis(20)),
        )
        .unwrap();
}
