//! End-to-end scenarios across definitions, machines, the store and archival.

use chrono::{Duration, Utc};
use eventchart::archive::{ArchivalService, ArchiveOutcome};
use eventchart::config::{ArchivalConfig, EngineConfig};
use eventchart::core::{EventEnvelope, EventSource};
use eventchart::definition::{ConfigError, MachineBuilder};
use eventchart::engine::{ErrorCategory, Machine, MachineError, MachineRuntime};
use eventchart::store::{seal, ChainPosition, EventDraft, EventStore};
use eventchart::MachineDefinition;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn traffic_light() -> Arc<MachineDefinition> {
    MachineBuilder::new(json!({
        "id": "light",
        "initial": "green",
        "states": {
            "green": { "on": { "TIMER": "yellow" } },
            "yellow": { "on": { "TIMER": "red" } },
            "red": { "on": { "TIMER": "green" } }
        }
    }))
    .build_shared()
    .unwrap()
}

#[test]
fn traffic_light_cycles_back_to_green() {
    let machine = Machine::in_memory(traffic_light());
    let mut state = machine.start().unwrap();
    assert!(state.matches("green"));

    for expected in ["yellow", "red", "green"] {
        let outcome = machine.send(&state, "TIMER").unwrap();
        let external = outcome
            .events
            .iter()
            .filter(|e| e.source == EventSource::External)
            .count();
        assert_eq!(external, 1);
        assert!(outcome.state.matches(expected));
        state = outcome.state;
    }

    assert_eq!(state.value(), ["light.green".to_string()]);
    let path: Vec<&[String]> = state.history().path();
    assert!(path.len() >= 4);
}

#[test]
fn guarded_transition_waits_for_context() {
    let definition = MachineBuilder::new(json!({
        "id": "launch",
        "initial": "idle",
        "context": { "count": 0 },
        "states": {
            "idle": {
                "on": {
                    "GO": { "target": "running", "guards": "hasCount" },
                    "SET": { "actions": "setCount" }
                }
            },
            "running": {}
        }
    }))
    .guard("hasCount", |ctx, _| ctx.get_as::<i64>("count").unwrap_or(0) > 0)
    .action("setCount", |ctx, scope| {
        let value = scope.payload("value").cloned().unwrap_or(Value::Null);
        ctx.set("count", value);
        Ok(())
    })
    .build_shared()
    .unwrap();
    let machine = Machine::in_memory(definition);
    let state = machine.start().unwrap();
    let root = state.root_event_id().unwrap();

    let blocked = machine.send(&state, "GO").unwrap();
    assert!(!blocked.transitioned);
    assert_eq!(blocked.state, state);
    assert!(blocked.events.is_empty());
    assert_eq!(
        machine.store().latest_sequence(root).unwrap(),
        Some(state.last_sequence())
    );

    let set = machine
        .send(&state, EventEnvelope::new("SET").with_payload(json!({ "value": 1 })))
        .unwrap();
    let go = machine.send(&set.state, "GO").unwrap();
    assert!(go.transitioned);
    assert!(go.state.matches("running"));
}

fn write_chain(store: &EventStore, count: usize, at: chrono::DateTime<Utc>) -> Vec<eventchart::store::MachineEvent> {
    let drafts = (0..count)
        .map(|i| EventDraft {
            event_type: format!("STEP{i}"),
            source: EventSource::External,
            payload: None,
            machine_value: vec!["m.a".into()],
            context: json!({ "step": i }).as_object().cloned().unwrap(),
            version: 1,
        })
        .collect();
    let events = seal("m", drafts, ChainPosition::default(), at);
    store.append(&events, true).unwrap();
    events
}

#[test]
fn archive_then_append_restores_the_chain() {
    let store = EventStore::in_memory();
    let service = ArchivalService::new(store.clone(), ArchivalConfig::default());
    let now = Utc::now();
    let original = write_chain(&store, 5, now - Duration::days(40));
    let root = original[0].root_event_id;

    let outcome = service.archive_if_eligible(root, now).unwrap();
    assert!(matches!(outcome, ArchiveOutcome::Archived { event_count: 5, .. }));
    assert!(store.events().query(root).unwrap().is_empty());
    assert_eq!(store.archives().get(root).unwrap().unwrap().event_count, 5);

    let last = original.last().unwrap();
    let context = json!({ "step": 4 }).as_object().cloned().unwrap();
    let next = seal(
        "m",
        vec![EventDraft {
            event_type: "STEP5".into(),
            source: EventSource::External,
            payload: None,
            machine_value: vec!["m.a".into()],
            context: json!({ "step": 5 }).as_object().cloned().unwrap(),
            version: 1,
        }],
        ChainPosition {
            root: Some(root),
            last_sequence: last.sequence_number,
            context: Some(&context),
        },
        now,
    );
    store.append(&next, true).unwrap();

    assert!(store.archives().get(root).unwrap().is_none());
    let live = store.events().query(root).unwrap();
    assert_eq!(live.len(), 6);
    assert_eq!(&live[..5], &original[..]);
    assert_eq!(
        live.iter().map(|e| e.sequence_number).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5, 6]
    );
    assert_eq!(store.reconstruct(root).unwrap().context.get("step"), Some(&json!(5)));
}

#[test]
fn archive_and_live_rows_are_mutually_exclusive() {
    let store = EventStore::in_memory();
    let service = ArchivalService::new(store.clone(), ArchivalConfig::default());
    let now = Utc::now();
    let root = write_chain(&store, 3, now - Duration::days(40))[0].root_event_id;

    service.archive_if_eligible(root, now).unwrap();
    let again = service.archive_if_eligible(root, now).unwrap();
    assert_eq!(again, ArchiveOutcome::AlreadyArchived { root });
    assert!(!store.events().exists(root).unwrap());

    assert_eq!(service.restore_root(root, now).unwrap(), 3);
    assert_eq!(service.restore_root(root, now).unwrap(), 0);
    assert!(store.events().exists(root).unwrap());
    assert!(store.archives().get(root).unwrap().is_none());
}

#[test]
fn archived_instances_continue_transparently() {
    let machine = Machine::in_memory(traffic_light());
    let service = ArchivalService::new(machine.store().clone(), ArchivalConfig::default());
    let state = machine.send(&machine.start().unwrap(), "TIMER").unwrap().state;
    let root = state.root_event_id().unwrap();

    let later = Utc::now() + Duration::days(31);
    assert!(service.archive_if_eligible(root, later).unwrap().is_archived());

    let restored = machine.restore(root).unwrap();
    assert_eq!(restored, state);
    assert!(!machine.store().events().exists(root).unwrap());
    assert_eq!(machine.store().archives().get(root).unwrap().unwrap().restore_count, 1);

    let outcome = machine.send(&restored, "TIMER").unwrap();
    assert!(outcome.state.matches("red"));
    assert!(machine.store().archives().get(root).unwrap().is_none());
    assert_eq!(
        machine.store().events().query(root).unwrap().len(),
        outcome.state.history().len()
    );
}

#[test]
fn fallback_branch_runs_exactly_once() {
    let checked = Arc::new(AtomicUsize::new(0));
    let fallbacks = Arc::new(AtomicUsize::new(0));
    let (checked_in, fallbacks_in) = (Arc::clone(&checked), Arc::clone(&fallbacks));

    let definition = MachineBuilder::new(json!({
        "id": "router",
        "initial": "waiting",
        "states": {
            "waiting": {
                "on": {
                    "ROUTE": [
                        { "target": "fast", "guards": ["never", "checked"] },
                        { "target": "slow", "actions": "fallback" }
                    ]
                }
            },
            "fast": {},
            "slow": {}
        }
    }))
    .guard("never", |_, _| false)
    .guard("checked", move |_, _| {
        checked_in.fetch_add(1, Ordering::SeqCst);
        true
    })
    .action("fallback", move |_, _| {
        fallbacks_in.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .build_shared()
    .unwrap();

    let mut runtime = MachineRuntime::start(Machine::in_memory(definition)).unwrap();
    assert!(runtime.send("ROUTE").unwrap());

    assert!(runtime.state().matches("slow"));
    assert_eq!(checked.load(Ordering::SeqCst), 0);
    assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
}

#[test]
fn parallel_node_completes_only_when_both_regions_are_final() {
    let definition = MachineBuilder::new(json!({
        "id": "order",
        "initial": "fulfilment",
        "states": {
            "fulfilment": {
                "type": "parallel",
                "onDone": "complete",
                "states": {
                    "payment": {
                        "initial": "pending",
                        "states": {
                            "pending": { "on": { "PAID": "settled" } },
                            "settled": { "type": "final" }
                        }
                    },
                    "shipping": {
                        "initial": "packing",
                        "states": {
                            "packing": { "on": { "SHIPPED": "delivered" } },
                            "delivered": { "type": "final" }
                        }
                    }
                }
            },
            "complete": { "type": "final", "result": "summary" }
        }
    }))
    .result("summary", |_, invocation| Ok(json!({ "last": invocation.event.event_type })))
    .build_shared()
    .unwrap();

    let mut runtime = MachineRuntime::start(Machine::in_memory(definition)).unwrap();
    assert!(runtime.state().is_in_parallel_state());
    assert!(runtime.state().matches_all(["fulfilment.payment.pending", "fulfilment.shipping.packing"]));

    runtime.send("PAID").unwrap();
    assert!(runtime.state().matches("fulfilment"));
    assert!(runtime.state().matches("fulfilment.payment.settled"));
    assert_eq!(runtime.result().unwrap(), None);

    runtime.send("SHIPPED").unwrap();
    assert!(runtime.state().matches("complete"));
    assert!(!runtime.state().is_in_parallel_state());
    assert_eq!(runtime.result().unwrap(), Some(json!({ "last": "SHIPPED" })));

    let types: Vec<&str> = runtime
        .state()
        .history()
        .events()
        .iter()
        .map(|e| e.event_type.as_str())
        .collect();
    assert!(types.contains(&"order.parallel.order.fulfilment.done"));
    assert!(types.contains(&"order.finish"));
}

#[test]
fn invalid_definitions_report_every_problem() {
    let err = MachineBuilder::new(json!({
        "id": "broken",
        "initial": "a",
        "unexpected": true,
        "states": {
            "a": {
                "on": {
                    "GO": [
                        { "target": "b" },
                        { "target": "b", "guards": "ok" }
                    ]
                }
            },
            "b": { "type": "final", "states": { "c": {} } },
            "p": { "type": "parallel", "initial": "x", "states": { "x": {} } }
        }
    }))
    .build()
    .unwrap_err();

    let errors = err.errors();
    assert!(errors.contains(&ConfigError::UnknownRootKey { key: "unexpected".into() }));
    assert!(errors.contains(&ConfigError::UnguardedBranchNotLast {
        state: "broken.a".into(),
        event: "GO".into()
    }));
    assert!(errors.contains(&ConfigError::InvalidFinalStateDefinition { state: "broken.b".into() }));
    assert!(errors.contains(&ConfigError::InitialOnParallel { state: "broken.p".into() }));
    assert!(errors.contains(&ConfigError::ParallelChildNotRegion {
        state: "broken.p".into(),
        child: "x".into()
    }));

    let machine_err = MachineError::from(err);
    assert_eq!(machine_err.category(), ErrorCategory::Configuration);
}

#[test]
fn lock_timings_come_from_configuration() {
    let config = EngineConfig::from_toml_str("[locks]\nwait_ms = 10\n").unwrap();
    let machine = Machine::new(traffic_light(), EventStore::in_memory_with(&config));
    let state = machine.start().unwrap();
    let root = state.root_event_id().unwrap();

    let _held = machine.store().lock(root).unwrap();
    let err = machine.send(&state, "TIMER").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Concurrency);
    assert!(err.is_retryable());
}
