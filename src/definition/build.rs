//! Building immutable machine definitions.

use super::error::{ConfigError, DefinitionError};
use super::node::{BehaviorRef, NodeId, StateKind, StateNode, Transition, TransitionBranch};
use super::validate::{behavior_list, check_config, node_kind};
use crate::core::{
    ActionScope, BehaviorError, BehaviorKind, BehaviorRegistry, ContextManager, Invocation,
    Schema,
};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

type Check = Validation<(), NonEmptyVec<ConfigError>>;

const DEFAULT_DELIMITER: &str = ".";

/// A validated, immutable machine definition.
///
/// Nodes live in an arena indexed by [`NodeId`]. Definitions are built
/// once and shared read-only (typically behind an `Arc`) by every instance.
#[derive(Clone, Debug)]
pub struct MachineDefinition {
    id: String,
    version: u32,
    delimiter: String,
    description: Option<String>,
    should_persist: bool,
    nodes: Vec<StateNode>,
    by_id: HashMap<String, NodeId>,
    aliases: HashMap<String, NodeId>,
    events: BTreeSet<String>,
    context: Map<String, Value>,
    schema: Option<Arc<Schema>>,
    event_schemas: HashMap<String, Schema>,
    behaviors: BehaviorRegistry,
    config: Value,
}

struct PendingTransition {
    source: NodeId,
    event: String,
    raw: Value,
    on_done: bool,
}

impl MachineDefinition {
    /// Validate a configuration and build the definition.
    ///
    /// All problems are collected and reported together.
    pub fn from_config(config: Value, behaviors: BehaviorRegistry) -> Result<Self, DefinitionError> {
        into_result(check_config(&config))?;

        let root = config.as_object().cloned().unwrap_or_default();
        let id = root
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let delimiter = root
            .get("delimiter")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_DELIMITER)
            .to_string();

        let mut definition = MachineDefinition {
            version: root
                .get("version")
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(1),
            description: root
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            should_persist: root
                .get("should_persist")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            nodes: Vec::new(),
            by_id: HashMap::new(),
            aliases: HashMap::new(),
            events: BTreeSet::new(),
            context: root
                .get("context")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            schema: None,
            event_schemas: HashMap::new(),
            behaviors,
            config: Value::Null,
            id: id.clone(),
            delimiter,
        };

        let mut pending = Vec::new();
        let mut checks: Vec<Check> = Vec::new();
        definition.add_node(&root, &id, None, &mut pending, &mut checks);

        for transition in pending {
            checks.push(definition.attach_transition(transition));
        }
        checks.push(definition.check_behaviors());
        into_result(Validation::all_vec(checks).map(|_| ()))?;

        if let Some(schema) = root.get("schema") {
            let schema = Schema::parse(schema)
                .map_err(|reason| DefinitionError::Invalid(vec![ConfigError::InvalidSchema { reason }]))?;
            definition.schema = Some(Arc::new(schema));
        }
        if let Some(events) = root.get("events").and_then(Value::as_object) {
            for (event, schema) in events {
                let schema = Schema::parse(schema).map_err(|reason| {
                    DefinitionError::Invalid(vec![ConfigError::InvalidEventSchema {
                        event: event.clone(),
                        reason,
                    }])
                })?;
                definition.event_schemas.insert(event.clone(), schema);
            }
        }

        definition.config = config;
        Ok(definition)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Whether instances write their events to the store.
    pub fn should_persist(&self) -> bool {
        self.should_persist
    }

    /// The configuration this definition was built from.
    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, handle: NodeId) -> &StateNode {
        &self.nodes[handle.0]
    }

    /// All nodes in document order.
    pub fn nodes(&self) -> &[StateNode] {
        &self.nodes
    }

    /// Look up a node by fully qualified id, id relative to the root, or
    /// explicit alias (with or without a leading `#`).
    pub fn find(&self, id: &str) -> Option<NodeId> {
        let id = id.strip_prefix('#').unwrap_or(id);
        self.by_id
            .get(id)
            .or_else(|| self.aliases.get(id))
            .or_else(|| {
                self.by_id
                    .get(&format!("{}{}{}", self.id, self.delimiter, id))
            })
            .copied()
    }

    /// Proper ancestors of `handle`, nearest first.
    pub fn ancestors(&self, handle: NodeId) -> Vec<NodeId> {
        let mut ancestors = Vec::new();
        let mut current = self.node(handle).parent;
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.node(parent).parent;
        }
        ancestors
    }

    /// Whether `node` is a proper descendant of `ancestor`.
    pub fn is_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.node(node).parent;
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.node(parent).parent;
        }
        false
    }

    /// Whether any node declares a transition for `event`.
    pub fn handles_event(&self, event: &str) -> bool {
        self.events.contains(event)
    }

    /// Event types declared anywhere in the tree, sorted.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(String::as_str)
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    pub fn event_schema(&self, event: &str) -> Option<&Schema> {
        self.event_schemas.get(event)
    }

    pub fn behaviors(&self) -> &BehaviorRegistry {
        &self.behaviors
    }

    /// Fresh context from the configuration, with the schema attached.
    pub fn initial_context(&self) -> ContextManager {
        let context = ContextManager::from_map(self.context.clone());
        match &self.schema {
            Some(schema) => context.with_schema(Arc::clone(schema)),
            None => context,
        }
    }

    fn add_node(
        &mut self,
        raw: &Map<String, Value>,
        key: &str,
        parent: Option<NodeId>,
        pending: &mut Vec<PendingTransition>,
        checks: &mut Vec<Check>,
    ) -> NodeId {
        let handle = NodeId(self.nodes.len());
        let (id, depth) = match parent {
            Some(parent) => {
                let parent = self.node(parent);
                (
                    format!("{}{}{}", parent.id, self.delimiter, key),
                    parent.depth + 1,
                )
            }
            None => (key.to_string(), 0),
        };

        let alias = parent
            .and(raw.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(alias) = &alias {
            if self.aliases.insert(alias.clone(), handle).is_some() {
                checks.push(Validation::fail(ConfigError::DuplicateId {
                    state: id.clone(),
                    id: alias.clone(),
                }));
            }
        }

        self.by_id.insert(id.clone(), handle);
        self.nodes.push(StateNode {
            handle,
            id,
            key: key.to_string(),
            alias,
            kind: node_kind(raw).unwrap_or(StateKind::Atomic),
            parent,
            children: Vec::new(),
            initial: None,
            depth,
            entry: behavior_refs(raw.get("entry")),
            exit: behavior_refs(raw.get("exit")),
            transitions: Vec::new(),
            on_done: None,
            result: raw.get("result").and_then(Value::as_str).map(BehaviorRef::parse),
            description: raw
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            meta: raw.get("meta").cloned(),
        });

        if let Some(on) = raw.get("on").and_then(Value::as_object) {
            for (event, transition) in on {
                pending.push(PendingTransition {
                    source: handle,
                    event: event.clone(),
                    raw: transition.clone(),
                    on_done: false,
                });
            }
        }
        if let Some(on_done) = raw.get("onDone") {
            pending.push(PendingTransition {
                source: handle,
                event: "onDone".to_string(),
                raw: on_done.clone(),
                on_done: true,
            });
        }

        let initial_key = raw.get("initial").and_then(Value::as_str);
        if let Some(states) = raw.get("states").and_then(Value::as_object) {
            for (child_key, child) in states {
                let Some(child) = child.as_object() else {
                    continue;
                };
                let child_handle = self.add_node(child, child_key, Some(handle), pending, checks);
                self.nodes[handle.0].children.push(child_handle);
                if initial_key == Some(child_key.as_str()) {
                    self.nodes[handle.0].initial = Some(child_handle);
                }
            }
        }

        handle
    }

    fn attach_transition(&mut self, pending: PendingTransition) -> Check {
        let raw_branches: Vec<&Value> = match &pending.raw {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        let mut checks: Vec<Check> = Vec::new();
        let mut branches = Vec::with_capacity(raw_branches.len());
        for raw in raw_branches {
            let (target, fields) = match raw {
                Value::String(target) => (Some(target.as_str()), None),
                Value::Object(fields) => (fields.get("target").and_then(Value::as_str), Some(fields)),
                _ => (None, None),
            };

            let resolved = match target.filter(|t| !t.is_empty()) {
                None => None,
                Some(target) => match self.resolve_target(pending.source, target) {
                    Some(handle) => Some(handle),
                    None => {
                        checks.push(Validation::fail(ConfigError::UnknownTarget {
                            state: self.node(pending.source).id.clone(),
                            event: pending.event.clone(),
                            target: target.to_string(),
                        }));
                        None
                    }
                },
            };

            let list = |field: &str| behavior_refs(fields.and_then(|f| f.get(field)));
            branches.push(TransitionBranch {
                target: resolved,
                guards: list("guards"),
                actions: list("actions"),
                calculators: list("calculators"),
                description: fields
                    .and_then(|f| f.get("description"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }

        let transition = Transition {
            event: pending.event.clone(),
            source: pending.source,
            branches,
        };
        let node = &mut self.nodes[pending.source.0];
        if pending.on_done {
            node.on_done = Some(transition);
        } else {
            node.transitions.push(transition);
            self.events.insert(pending.event);
        }

        Validation::all_vec(checks).map(|_| ())
    }

    /// Resolve a target written on `source`.
    ///
    /// `#id` selects by alias or id, a leading delimiter selects a child of
    /// the source, anything else names a sibling (or a path below one),
    /// falling back to ids relative to the root.
    fn resolve_target(&self, source: NodeId, target: &str) -> Option<NodeId> {
        if let Some(selector) = target.strip_prefix('#') {
            return self
                .aliases
                .get(selector)
                .copied()
                .or_else(|| self.find(selector));
        }

        let node = self.node(source);
        if let Some(child_path) = target.strip_prefix(self.delimiter.as_str()) {
            return self
                .by_id
                .get(&format!("{}{}{}", node.id, self.delimiter, child_path))
                .copied();
        }

        let scope = node.parent.map(|p| self.node(p)).unwrap_or(node);
        self.by_id
            .get(&format!("{}{}{}", scope.id, self.delimiter, target))
            .copied()
            .or_else(|| self.find(target))
    }

    fn check_behaviors(&self) -> Check {
        let mut checks: Vec<Check> = Vec::new();
        let mut require = |state: &str, kind: BehaviorKind, reference: &BehaviorRef| {
            if !self.behaviors.contains(kind, &reference.name) {
                checks.push(Validation::fail(ConfigError::UnknownBehavior {
                    state: state.to_string(),
                    kind,
                    name: reference.name.clone(),
                }));
            }
        };

        for node in &self.nodes {
            for reference in node.entry.iter().chain(&node.exit) {
                require(&node.id, BehaviorKind::Action, reference);
            }
            if let Some(result) = &node.result {
                require(&node.id, BehaviorKind::Result, result);
            }
            for transition in node.transitions.iter().chain(&node.on_done) {
                for branch in &transition.branches {
                    for guard in &branch.guards {
                        require(&node.id, BehaviorKind::Guard, guard);
                    }
                    for action in &branch.actions {
                        require(&node.id, BehaviorKind::Action, action);
                    }
                    for calculator in &branch.calculators {
                        require(&node.id, BehaviorKind::Calculator, calculator);
                    }
                }
            }
        }

        Validation::all_vec(checks).map(|_| ())
    }
}

fn behavior_refs(value: Option<&Value>) -> Vec<BehaviorRef> {
    value
        .and_then(behavior_list)
        .unwrap_or_default()
        .into_iter()
        .map(BehaviorRef::parse)
        .collect()
}

fn into_result(check: Check) -> Result<(), DefinitionError> {
    match check {
        Validation::Success(_) => Ok(()),
        Validation::Failure(errors) => Err(DefinitionError::Invalid(errors.iter().cloned().collect())),
    }
}

/// Builder for machine definitions with a fluent API.
///
/// # Example
///
/// ```rust
/// use eventchart::definition::MachineBuilder;
/// use serde_json::json;
///
/// let definition = MachineBuilder::new(json!({
///     "id": "counter",
///     "initial": "active",
///     "context": { "count": 0 },
///     "states": {
///         "active": { "on": { "INC": { "actions": "increment" } } }
///     }
/// }))
/// .action("increment", |ctx, _| {
///     let count = ctx.get_as::<i64>("count").unwrap_or(0);
///     ctx.set("count", count + 1);
///     Ok(())
/// })
/// .build()
/// .unwrap();
///
/// assert_eq!(definition.id(), "counter");
/// assert!(definition.handles_event("INC"));
/// ```
pub struct MachineBuilder {
    config: Value,
    behaviors: BehaviorRegistry,
}

impl MachineBuilder {
    pub fn new(config: Value) -> Self {
        Self {
            config,
            behaviors: BehaviorRegistry::new(),
        }
    }

    /// Add every behavior of `registry`.
    pub fn behaviors(mut self, registry: BehaviorRegistry) -> Self {
        self.behaviors = self.behaviors.merge(registry);
        self
    }

    pub fn guard<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&ContextManager, &Invocation<'_>) -> bool + Send + Sync + 'static,
    {
        self.behaviors = self.behaviors.guard(name, predicate);
        self
    }

    pub fn action<F>(mut self, name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut ContextManager, &mut ActionScope<'_>) -> Result<(), BehaviorError>
            + Send
            + Sync
            + 'static,
    {
        self.behaviors = self.behaviors.action(name, run);
        self
    }

    pub fn calculator<F>(mut self, name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut ContextManager, &Invocation<'_>) -> Result<(), BehaviorError>
            + Send
            + Sync
            + 'static,
    {
        self.behaviors = self.behaviors.calculator(name, run);
        self
    }

    pub fn result<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&ContextManager, &Invocation<'_>) -> Result<Value, BehaviorError> + Send + Sync + 'static,
    {
        self.behaviors = self.behaviors.result(name, compute);
        self
    }

    pub fn build(self) -> Result<MachineDefinition, DefinitionError> {
        MachineDefinition::from_config(self.config, self.behaviors)
    }

    /// Build and wrap in an `Arc` for sharing across instances.
    pub fn build_shared(self) -> Result<Arc<MachineDefinition>, DefinitionError> {
        self.build().map(Arc::new)
    }
}
