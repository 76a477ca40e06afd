//! Persisted event records.

use crate::core::{ContextDelta, EventSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// One immutable row of an instance's event chain.
///
/// The first event of a root carries the full context; every later event
/// carries only the keys that changed since the previous one. Removed key
/// paths are listed under `meta.removed`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MachineEvent {
    pub id: Uuid,
    pub sequence_number: u64,
    pub created_at: DateTime<Utc>,
    pub machine_id: String,
    pub machine_value: Vec<String>,
    pub root_event_id: Uuid,
    pub source: EventSource,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Option<Value>,
    pub context: Value,
    pub meta: Option<Value>,
    pub version: u32,
}

impl MachineEvent {
    /// Whether this event opens its chain.
    pub fn is_root(&self) -> bool {
        self.id == self.root_event_id
    }

    /// Key paths this event removed from the context.
    pub fn removed_paths(&self) -> Vec<Vec<String>> {
        self.meta
            .as_ref()
            .and_then(|meta| meta.get("removed"))
            .and_then(|removed| serde_json::from_value(removed.clone()).ok())
            .unwrap_or_default()
    }

    /// The context change carried by this event.
    pub fn delta(&self) -> ContextDelta {
        ContextDelta {
            changed: self.context.as_object().cloned().unwrap_or_default(),
            removed: self.removed_paths(),
        }
    }
}

/// An event recorded by the interpreter before it has an identity.
///
/// `context` is the full context snapshot right after the event;
/// [`seal`] turns it into a delta against the previous snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct EventDraft {
    pub event_type: String,
    pub source: EventSource,
    pub payload: Option<Value>,
    pub machine_value: Vec<String>,
    pub context: Map<String, Value>,
    pub version: u32,
}

/// Where a batch of drafts continues an existing chain.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChainPosition<'a> {
    pub root: Option<Uuid>,
    pub last_sequence: u64,
    pub context: Option<&'a Map<String, Value>>,
}

/// Assign ids, sequence numbers and incremental contexts to drafts.
///
/// Without a root, the first draft opens a new chain: its id becomes the
/// root id and it carries the full context.
pub fn seal(
    machine_id: &str,
    drafts: Vec<EventDraft>,
    position: ChainPosition<'_>,
    now: DateTime<Utc>,
) -> Vec<MachineEvent> {
    let mut root = position.root;
    let mut sequence = position.last_sequence;
    let mut previous = position.context.cloned();
    let mut sealed = Vec::with_capacity(drafts.len());

    for draft in drafts {
        let id = Uuid::now_v7();
        let root_event_id = *root.get_or_insert(id);
        sequence += 1;

        let (context, meta) = match &previous {
            None => (Value::Object(draft.context.clone()), None),
            Some(before) => {
                let delta = ContextDelta::between(before, &draft.context);
                let meta = (!delta.removed.is_empty()).then(|| json!({ "removed": delta.removed }));
                (Value::Object(delta.changed), meta)
            }
        };

        sealed.push(MachineEvent {
            id,
            sequence_number: sequence,
            created_at: now,
            machine_id: machine_id.to_string(),
            machine_value: draft.machine_value,
            root_event_id,
            source: draft.source,
            event_type: draft.event_type,
            payload: draft.payload,
            context,
            meta,
            version: draft.version,
        });
        previous = Some(draft.context);
    }

    sealed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(event_type: &str, context: Value) -> EventDraft {
        EventDraft {
            event_type: event_type.into(),
            source: EventSource::Internal,
            payload: None,
            machine_value: vec!["m.a".into()],
            context: context.as_object().cloned().unwrap(),
            version: 1,
        }
    }

    #[test]
    fn first_event_opens_chain_with_full_context() {
        let events = seal(
            "m",
            vec![
                draft("m.start", json!({ "count": 0, "name": "x" })),
                draft("INC", json!({ "count": 1, "name": "x" })),
            ],
            ChainPosition::default(),
            Utc::now(),
        );

        assert!(events[0].is_root());
        assert_eq!(events[1].root_event_id, events[0].id);
        assert_eq!(events[0].context, json!({ "count": 0, "name": "x" }));
        assert_eq!(events[1].context, json!({ "count": 1 }));
        assert_eq!(
            events.iter().map(|e| e.sequence_number).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn continuing_chain_records_deltas_and_removals() {
        let root = Uuid::now_v7();
        let before = json!({ "a": 1, "b": 2 }).as_object().cloned().unwrap();

        let events = seal(
            "m",
            vec![draft("DROP", json!({ "a": 1 }))],
            ChainPosition {
                root: Some(root),
                last_sequence: 7,
                context: Some(&before),
            },
            Utc::now(),
        );

        let event = &events[0];
        assert_eq!(event.root_event_id, root);
        assert!(!event.is_root());
        assert_eq!(event.sequence_number, 8);
        assert_eq!(event.context, json!({}));
        assert_eq!(event.removed_paths(), vec![vec!["b".to_string()]]);
    }

    #[test]
    fn record_serializes_with_type_field() {
        let events = seal(
            "m",
            vec![draft("m.start", json!({}))],
            ChainPosition::default(),
            Utc::now(),
        );
        let json = serde_json::to_value(&events[0]).unwrap();

        assert_eq!(json["type"], "m.start");
        assert_eq!(json["source"], "internal");
        assert_eq!(json["sequence_number"], 1);
        assert!(json["meta"].is_null());
    }
}
