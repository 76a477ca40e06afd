//! Static validation of machine configurations.
//!
//! Validation runs on the raw configuration before anything is built and
//! accumulates every problem instead of stopping at the first one.

use super::error::ConfigError;
use super::node::StateKind;
use crate::core::Schema;
use serde_json::{Map, Value};
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

type Check = Validation<(), NonEmptyVec<ConfigError>>;

/// Keys accepted at the root of a configuration.
pub const ROOT_KEYS: &[&str] = &[
    "id",
    "version",
    "initial",
    "context",
    "schema",
    "events",
    "states",
    "on",
    "entry",
    "exit",
    "type",
    "delimiter",
    "should_persist",
    "description",
    "onDone",
];

/// Keys accepted on a state node.
pub const STATE_KEYS: &[&str] = &[
    "id",
    "type",
    "initial",
    "states",
    "on",
    "entry",
    "exit",
    "result",
    "onDone",
    "description",
    "meta",
];

const BRANCH_KEYS: &[&str] = &["target", "guards", "actions", "calculators", "description"];

/// Check the shape of a whole configuration.
pub fn check_config(config: &Value) -> Check {
    let Some(root) = config.as_object() else {
        return Validation::fail(ConfigError::NotAnObject);
    };

    let mut checks: Vec<Check> = Vec::new();

    for key in root.keys() {
        if !ROOT_KEYS.contains(&key.as_str()) {
            checks.push(Validation::fail(ConfigError::UnknownRootKey { key: key.clone() }));
        }
    }

    let id = match root.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            checks.push(Validation::fail(ConfigError::MissingId));
            "<machine>".to_string()
        }
    };

    let delimiter = root
        .get("delimiter")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
        .unwrap_or(".");

    checks.push(check_root_fields(&id, root));
    checks.push(check_node(&id, root, true, delimiter));

    Validation::all_vec(checks).map(|_| ())
}

/// Kind a node resolves to, from `type` or inferred from `states`.
pub(crate) fn node_kind(node: &Map<String, Value>) -> Option<StateKind> {
    match node.get("type").and_then(Value::as_str) {
        Some(name) => StateKind::parse(name),
        None if has_children(node) => Some(StateKind::Compound),
        None => Some(StateKind::Atomic),
    }
}

fn has_children(node: &Map<String, Value>) -> bool {
    node.get("states")
        .and_then(Value::as_object)
        .is_some_and(|states| !states.is_empty())
}

fn check_root_fields(id: &str, root: &Map<String, Value>) -> Check {
    let mut checks: Vec<Check> = Vec::new();

    if let Some(delimiter) = root.get("delimiter") {
        if !delimiter.as_str().is_some_and(|d| !d.is_empty()) {
            checks.push(invalid_field(id, "delimiter", "must be a non-empty string"));
        }
    }
    if let Some(version) = root.get("version") {
        if version.as_u64().and_then(|v| u32::try_from(v).ok()).is_none() {
            checks.push(invalid_field(id, "version", "must be a non-negative integer"));
        }
    }
    if let Some(persist) = root.get("should_persist") {
        if !persist.is_boolean() {
            checks.push(invalid_field(id, "should_persist", "must be a boolean"));
        }
    }
    if let Some(context) = root.get("context") {
        if !context.is_object() {
            checks.push(invalid_field(id, "context", "must be an object"));
        }
    }
    if let Some(schema) = root.get("schema") {
        if let Err(reason) = Schema::parse(schema) {
            checks.push(Validation::fail(ConfigError::InvalidSchema { reason }));
        }
    }
    if let Some(events) = root.get("events") {
        match events.as_object() {
            Some(events) => {
                for (event, schema) in events {
                    if let Err(reason) = Schema::parse(schema) {
                        checks.push(Validation::fail(ConfigError::InvalidEventSchema {
                            event: event.clone(),
                            reason,
                        }));
                    }
                }
            }
            None => checks.push(invalid_field(id, "events", "must be an object of event -> schema")),
        }
    }

    Validation::all_vec(checks).map(|_| ())
}

fn check_node(path: &str, node: &Map<String, Value>, is_root: bool, delimiter: &str) -> Check {
    let mut checks: Vec<Check> = Vec::new();

    if !is_root {
        for key in node.keys() {
            if !STATE_KEYS.contains(&key.as_str()) {
                checks.push(Validation::fail(ConfigError::UnknownStateKey {
                    state: path.to_string(),
                    key: key.clone(),
                }));
            }
        }
        if let Some(alias) = node.get("id") {
            if !alias.as_str().is_some_and(|a| !a.is_empty()) {
                checks.push(invalid_field(path, "id", "must be a non-empty string"));
            }
        }
    }

    let Some(kind) = node_kind(node) else {
        let found = node.get("type").map(ToString::to_string).unwrap_or_default();
        checks.push(Validation::fail(ConfigError::InvalidType {
            state: path.to_string(),
            found,
        }));
        return Validation::all_vec(checks).map(|_| ());
    };

    let states = match node.get("states") {
        None => None,
        Some(Value::Object(states)) => Some(states),
        Some(_) => {
            checks.push(invalid_field(path, "states", "must be an object of child states"));
            None
        }
    };

    checks.push(check_kind_rules(path, node, kind, states));

    for field in ["entry", "exit"] {
        if let Some(value) = node.get(field) {
            if behavior_list(value).is_none() {
                checks.push(invalid_field(path, field, "must be a string or an array of strings"));
            }
        }
    }
    if let Some(description) = node.get("description") {
        if !description.is_string() {
            checks.push(invalid_field(path, "description", "must be a string"));
        }
    }

    match node.get("on") {
        None => {}
        Some(Value::Object(on)) => {
            for (event, transition) in on {
                checks.push(check_transition(path, event, transition));
            }
        }
        Some(_) => checks.push(invalid_field(path, "on", "must be an object of event -> transition")),
    }

    if let Some(on_done) = node.get("onDone") {
        if !matches!(kind, StateKind::Compound | StateKind::Parallel) {
            checks.push(invalid_field(path, "onDone", "is only allowed on compound or parallel states"));
        }
        checks.push(check_transition(path, "onDone", on_done));
    }

    if let Some(states) = states {
        for (key, child) in states {
            let child_path = format!("{path}{delimiter}{key}");
            match child.as_object() {
                Some(child) => checks.push(check_node(&child_path, child, false, delimiter)),
                None => checks.push(invalid_field(&child_path, "states", "state must be an object")),
            }
        }
    }

    Validation::all_vec(checks).map(|_| ())
}

fn check_kind_rules(
    path: &str,
    node: &Map<String, Value>,
    kind: StateKind,
    states: Option<&Map<String, Value>>,
) -> Check {
    let state = path.to_string();
    let has_states = states.is_some_and(|s| !s.is_empty());
    let mut checks: Vec<Check> = Vec::new();

    if node.contains_key("result") {
        if kind != StateKind::Final {
            checks.push(Validation::fail(ConfigError::ResultOnNonFinal {
                state: state.clone(),
            }));
        } else if !node.get("result").is_some_and(Value::is_string) {
            checks.push(invalid_field(path, "result", "must be a string"));
        }
    }

    match kind {
        StateKind::Final => {
            if node.contains_key("states") || node.contains_key("on") {
                checks.push(Validation::fail(ConfigError::InvalidFinalStateDefinition { state }));
            }
        }
        StateKind::Atomic => {
            if has_states {
                checks.push(Validation::fail(ConfigError::AtomicWithChildren { state }));
            }
        }
        StateKind::Compound => match (states.filter(|s| !s.is_empty()), node.get("initial")) {
            (None, _) => checks.push(Validation::fail(ConfigError::EmptyCompound { state })),
            (Some(_), None) => checks.push(Validation::fail(ConfigError::MissingInitial { state })),
            (Some(children), Some(initial)) => match initial.as_str() {
                Some(name) if children.contains_key(name) => {}
                Some(name) => checks.push(Validation::fail(ConfigError::UnknownInitial {
                    state,
                    initial: name.to_string(),
                })),
                None => checks.push(Validation::fail(ConfigError::MissingInitial { state })),
            },
        },
        StateKind::Parallel => {
            if node.contains_key("initial") {
                checks.push(Validation::fail(ConfigError::InitialOnParallel {
                    state: state.clone(),
                }));
            }
            match states.filter(|s| !s.is_empty()) {
                None => checks.push(Validation::fail(ConfigError::EmptyCompound { state })),
                Some(children) => {
                    for (key, child) in children {
                        let is_region = child
                            .as_object()
                            .is_some_and(|c| has_children(c) && node_kind(c) != Some(StateKind::Parallel));
                        if !is_region {
                            checks.push(Validation::fail(ConfigError::ParallelChildNotRegion {
                                state: state.clone(),
                                child: key.clone(),
                            }));
                        }
                    }
                }
            }
        }
    }

    Validation::all_vec(checks).map(|_| ())
}

/// Check one transition declaration in any of its accepted forms.
fn check_transition(path: &str, event: &str, transition: &Value) -> Check {
    let malformed = |reason: &str| {
        Validation::fail(ConfigError::InvalidTransition {
            state: path.to_string(),
            event: event.to_string(),
            reason: reason.to_string(),
        })
    };

    match transition {
        Value::Null | Value::String(_) => Validation::success(()),
        Value::Object(branch) => check_branch(path, event, branch),
        Value::Array(branches) if branches.is_empty() => malformed("branch list is empty"),
        Value::Array(branches) => {
            let last = branches.len() - 1;
            let mut checks: Vec<Check> = Vec::new();
            for (index, branch) in branches.iter().enumerate() {
                let guarded = match branch {
                    Value::String(_) => false,
                    Value::Object(fields) => {
                        checks.push(check_branch(path, event, fields));
                        fields
                            .get("guards")
                            .and_then(behavior_list)
                            .is_some_and(|guards| !guards.is_empty())
                    }
                    _ => {
                        checks.push(malformed("branches must be strings or objects"));
                        continue;
                    }
                };
                if !guarded && index != last {
                    checks.push(Validation::fail(ConfigError::UnguardedBranchNotLast {
                        state: path.to_string(),
                        event: event.to_string(),
                    }));
                }
            }
            Validation::all_vec(checks).map(|_| ())
        }
        _ => malformed("expected a target, a branch object, a branch list or null"),
    }
}

fn check_branch(path: &str, event: &str, branch: &Map<String, Value>) -> Check {
    let malformed = |reason: String| {
        Validation::fail(ConfigError::InvalidTransition {
            state: path.to_string(),
            event: event.to_string(),
            reason,
        })
    };
    let mut checks: Vec<Check> = Vec::new();

    for key in branch.keys() {
        if !BRANCH_KEYS.contains(&key.as_str()) {
            checks.push(malformed(format!("unknown branch key '{key}'")));
        }
    }
    if let Some(target) = branch.get("target") {
        if !(target.is_null() || target.is_string()) {
            checks.push(malformed("target must be a string or null".to_string()));
        }
    }
    for field in ["guards", "actions", "calculators"] {
        if let Some(value) = branch.get(field) {
            if behavior_list(value).is_none() {
                checks.push(malformed(format!("{field} must be a string or an array of strings")));
            }
        }
    }

    Validation::all_vec(checks).map(|_| ())
}

/// Read a behavior list written as one string or an array of strings.
pub(crate) fn behavior_list(value: &Value) -> Option<Vec<&str>> {
    match value {
        Value::String(reference) => Some(vec![reference.as_str()]),
        Value::Array(items) => items.iter().map(Value::as_str).collect(),
        _ => None,
    }
}

fn invalid_field(path: &str, field: &str, reason: &str) -> Check {
    Validation::fail(ConfigError::InvalidField {
        state: path.to_string(),
        field: field.to_string(),
        reason: reason.to_string(),
    })
}
