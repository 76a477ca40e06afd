//! Pure interpretation of events against a definition.
//!
//! The interpreter does no I/O. It takes a configuration and a context,
//! applies one event (plus everything that event causes: `onDone`
//! transitions, `@always` transitions and raised events) and returns the
//! resulting configuration, context and the drafts to persist.

use super::error::TransitionError;
use super::lifecycle::{Lifecycle, Recorder};
use super::resolver::TransitionResolver;
use crate::core::{
    ActionScope, BehaviorKind, ContextManager, EventEnvelope, EventSource, Invocation, ALWAYS,
};
use crate::definition::{BehaviorRef, MachineDefinition, NodeId, StateKind, Transition, TransitionBranch};
use crate::store::EventDraft;
use serde_json::Map;
use std::collections::{BTreeSet, HashSet, VecDeque};

/// Output of one interpretation.
#[derive(Debug)]
pub struct Step {
    /// Active leaf ids in document order.
    pub value: Vec<String>,
    pub context: ContextManager,
    /// Recorded events in execution order, not yet sealed.
    pub drafts: Vec<EventDraft>,
    /// Whether the event selected a transition branch.
    pub transitioned: bool,
}

/// Runs events against a machine definition.
///
/// # Example
///
/// ```rust
/// use eventchart::definition::MachineBuilder;
/// use eventchart::engine::Interpreter;
/// use eventchart::core::EventEnvelope;
/// use serde_json::json;
///
/// let definition = MachineBuilder::new(json!({
///     "id": "light",
///     "initial": "green",
///     "states": {
///         "green": { "on": { "TIMER": "yellow" } },
///         "yellow": {}
///     }
/// }))
/// .build()
/// .unwrap();
///
/// let interpreter = Interpreter::new(&definition);
/// let started = interpreter.start(definition.initial_context(), 1).unwrap();
/// assert_eq!(started.value, vec!["light.green"]);
///
/// let step = interpreter
///     .send(&started.value, started.context, &EventEnvelope::new("TIMER"))
///     .unwrap();
/// assert!(step.transitioned);
/// assert_eq!(step.value, vec!["light.yellow"]);
/// ```
pub struct Interpreter<'d> {
    definition: &'d MachineDefinition,
}

impl<'d> Interpreter<'d> {
    pub fn new(definition: &'d MachineDefinition) -> Self {
        Self { definition }
    }

    /// Enter the initial configuration.
    pub fn start(&self, context: ContextManager, version: u32) -> Result<Step, TransitionError> {
        let names = Lifecycle::new(self.definition.id());
        let mut run = Run::new(self.definition, BTreeSet::new(), context, version);
        let event = EventEnvelope::internal(names.start());

        run.note(names.start());
        run.validate_context()?;

        let mut entry = BTreeSet::new();
        run.add_descendants(self.definition.root(), &mut entry);
        run.enter_all(entry, &event)?;
        run.settle(&event)?;
        run.drain_raised()?;

        Ok(run.finish())
    }

    /// Apply `event` to the configuration `value`.
    ///
    /// An event no node declares is an error. An event that is declared but
    /// selects no branch yields a step with `transitioned == false`, the
    /// input value and context, and no drafts.
    pub fn send(
        &self,
        value: &[String],
        context: ContextManager,
        event: &EventEnvelope,
    ) -> Result<Step, TransitionError> {
        check_event(self.definition, event)?;
        let active = self.configuration(value)?;
        let version = event.version;
        let mut run = Run::new(self.definition, active, context, version);

        run.record_event(event);
        if !run.step(event)? {
            tracing::debug!(
                machine = self.definition.id(),
                event = %event.event_type,
                "no transition selected"
            );
            let (value, context) = (run.value(), run.base_context);
            return Ok(Step {
                value,
                context,
                drafts: Vec::new(),
                transitioned: false,
            });
        }
        run.settle(event)?;
        run.drain_raised()?;

        Ok(run.finish())
    }

    /// Rebuild the full set of active nodes from leaf ids.
    fn configuration(&self, value: &[String]) -> Result<BTreeSet<NodeId>, TransitionError> {
        let mut active = BTreeSet::new();
        for id in value {
            let node = self
                .definition
                .find(id)
                .ok_or_else(|| TransitionError::UnknownState { id: id.clone() })?;
            active.insert(node);
            active.extend(self.definition.ancestors(node));
        }
        Ok(active)
    }
}

fn check_event(definition: &MachineDefinition, event: &EventEnvelope) -> Result<(), TransitionError> {
    if !definition.handles_event(&event.event_type) {
        return Err(TransitionError::NoTransitionDefinition {
            event: event.event_type.clone(),
        });
    }
    if let Some(schema) = definition.event_schema(&event.event_type) {
        let empty = Map::new();
        let payload = event
            .payload
            .as_ref()
            .and_then(|payload| payload.as_object())
            .unwrap_or(&empty);
        schema
            .validate(payload)
            .map_err(|violations| TransitionError::PayloadInvalid {
                event: event.event_type.clone(),
                violations,
            })?;
    }
    Ok(())
}

/// Mutable working set of one interpretation.
struct Run<'d> {
    definition: &'d MachineDefinition,
    names: Lifecycle<'d>,
    active: BTreeSet<NodeId>,
    base_context: ContextManager,
    context: ContextManager,
    recorder: Recorder,
    pending_done: VecDeque<NodeId>,
    raised: VecDeque<EventEnvelope>,
}

impl<'d> Run<'d> {
    fn new(
        definition: &'d MachineDefinition,
        active: BTreeSet<NodeId>,
        context: ContextManager,
        version: u32,
    ) -> Self {
        Self {
            definition,
            names: Lifecycle::new(definition.id()),
            active,
            base_context: context.clone(),
            context,
            recorder: Recorder::new(version),
            pending_done: VecDeque::new(),
            raised: VecDeque::new(),
        }
    }

    fn finish(self) -> Step {
        Step {
            value: self.value(),
            context: self.context,
            drafts: self.recorder.into_drafts(),
            transitioned: true,
        }
    }

    fn value(&self) -> Vec<String> {
        self.active
            .iter()
            .map(|handle| self.definition.node(*handle))
            .filter(|node| node.kind().is_leaf())
            .map(|node| node.id().to_string())
            .collect()
    }

    fn note(&mut self, event_type: String) {
        let value = self.value();
        self.recorder.internal(event_type, &value, &self.context);
    }

    /// Record an incoming event with the configuration it arrived in.
    fn record_event(&mut self, event: &EventEnvelope) {
        let value = self.value();
        self.recorder.record(
            event.event_type.clone(),
            event.source,
            event.payload.clone(),
            &value,
            &self.context,
        );
    }

    fn validate_context(&self) -> Result<(), TransitionError> {
        self.context
            .validate()
            .map_err(|violations| TransitionError::ContextInvalid { violations })
    }

    /// Dispatch `event` to every active region.
    ///
    /// For each active leaf the closest ancestor-or-self declaring the
    /// event is the candidate source. Sources are processed in document
    /// order over the shared context; a source exited by an earlier
    /// transition of the same step is skipped.
    fn step(&mut self, event: &EventEnvelope) -> Result<bool, TransitionError> {
        let definition = self.definition;
        let mut selected = false;
        for source in self.sources(&event.event_type) {
            if !self.active.contains(&source) {
                continue;
            }
            let Some(transition) = definition.node(source).transition(&event.event_type) else {
                continue;
            };
            if self.take(transition, event)? {
                selected = true;
            }
        }
        Ok(selected)
    }

    fn sources(&self, event_type: &str) -> Vec<NodeId> {
        let mut sources: Vec<NodeId> = Vec::new();
        for leaf in self
            .active
            .iter()
            .copied()
            .filter(|handle| self.definition.node(*handle).kind().is_leaf())
        {
            let declaring = std::iter::once(leaf)
                .chain(self.definition.ancestors(leaf))
                .find(|handle| self.definition.node(*handle).transition(event_type).is_some());
            if let Some(source) = declaring {
                if !sources.contains(&source) {
                    sources.push(source);
                }
            }
        }
        sources
    }

    fn take(&mut self, transition: &'d Transition, event: &EventEnvelope) -> Result<bool, TransitionError> {
        let value = self.value();
        let resolution = TransitionResolver::new(self.definition).resolve(
            transition,
            &self.context,
            event,
            &value,
            &mut self.recorder,
        )?;
        let Some(resolution) = resolution else {
            return Ok(false);
        };

        self.context = resolution.context;
        self.validate_context()?;
        self.execute(transition, resolution.branch, event)?;
        Ok(true)
    }

    fn execute(
        &mut self,
        transition: &Transition,
        branch: &TransitionBranch,
        event: &EventEnvelope,
    ) -> Result<(), TransitionError> {
        let definition = self.definition;
        let source_id = definition.node(transition.source).id();
        self.note(self.names.transition_start(source_id, &transition.event));

        match branch.target {
            None => self.run_actions(&branch.actions, event)?,
            Some(target) => {
                let domain = self.domain(transition.source, target);

                let exit: Vec<NodeId> = self
                    .active
                    .iter()
                    .rev()
                    .copied()
                    .filter(|handle| self.definition.is_descendant(*handle, domain))
                    .collect();
                for handle in exit {
                    self.exit_node(handle, event)?;
                }

                self.run_actions(&branch.actions, event)?;

                let entry = self.entry_set(domain, target);
                self.enter_all(entry, event)?;
            }
        }

        self.note(self.names.transition_finish(source_id, &transition.event));
        tracing::trace!(
            machine = self.definition.id(),
            source = source_id,
            event = %transition.event,
            "transition taken"
        );
        Ok(())
    }

    /// Node whose descendants a transition exits and re-enters.
    fn domain(&self, source: NodeId, target: NodeId) -> NodeId {
        if self.definition.is_descendant(target, source) {
            return source;
        }
        self.definition
            .ancestors(source)
            .into_iter()
            .find(|ancestor| {
                !self.definition.node(*ancestor).is_parallel()
                    && self.definition.is_descendant(target, *ancestor)
            })
            .unwrap_or_else(|| self.definition.root())
    }

    fn entry_set(&self, domain: NodeId, target: NodeId) -> BTreeSet<NodeId> {
        let mut entry = BTreeSet::new();
        self.add_descendants(target, &mut entry);

        let mut path = Vec::new();
        for ancestor in self.definition.ancestors(target) {
            path.push(ancestor);
            if ancestor == domain {
                break;
            }
            entry.insert(ancestor);
        }

        for ancestor in path {
            if !self.definition.node(ancestor).is_parallel() {
                continue;
            }
            for region in self.definition.node(ancestor).children() {
                let holds_target = *region == target || self.definition.is_descendant(target, *region);
                if !holds_target && !entry.contains(region) {
                    self.add_descendants(*region, &mut entry);
                }
            }
        }

        entry.remove(&domain);
        entry
    }

    /// `node` and the default descendants entered with it.
    fn add_descendants(&self, handle: NodeId, entry: &mut BTreeSet<NodeId>) {
        entry.insert(handle);
        let node = self.definition.node(handle);
        match node.kind() {
            StateKind::Compound => {
                if let Some(initial) = node.initial() {
                    self.add_descendants(initial, entry);
                }
            }
            StateKind::Parallel => {
                for child in node.children() {
                    self.add_descendants(*child, entry);
                }
            }
            StateKind::Atomic | StateKind::Final => {}
        }
    }

    fn exit_node(&mut self, handle: NodeId, event: &EventEnvelope) -> Result<(), TransitionError> {
        let definition = self.definition;
        let node = definition.node(handle);
        self.run_actions(node.exit(), event)?;
        self.note(self.names.state_exit(node.id()));
        self.active.remove(&handle);
        Ok(())
    }

    fn enter_all(&mut self, entry: BTreeSet<NodeId>, event: &EventEnvelope) -> Result<(), TransitionError> {
        for handle in entry {
            self.enter_node(handle, event)?;
        }
        Ok(())
    }

    fn enter_node(&mut self, handle: NodeId, event: &EventEnvelope) -> Result<(), TransitionError> {
        let definition = self.definition;
        let node = definition.node(handle);
        self.active.insert(handle);
        self.note(self.names.state_enter(node.id()));

        if let Some(parent) = node.parent() {
            let parent = definition.node(parent);
            if parent.is_parallel() {
                self.note(self.names.region_enter(parent.id(), node.id()));
            }
        }

        self.run_actions(node.entry(), event)?;

        if node.is_final() {
            self.final_entered(handle);
        }
        Ok(())
    }

    /// Record completion of the final node's parent and of an enclosing
    /// parallel node once every region is done.
    fn final_entered(&mut self, handle: NodeId) {
        let definition = self.definition;
        let Some(parent) = definition.node(handle).parent() else {
            return;
        };
        let parent_node = definition.node(parent);
        self.note(self.names.state_done(parent_node.id()));

        match parent_node.parent() {
            None => self.note(self.names.finish()),
            Some(_) if parent_node.on_done().is_some() => self.pending_done.push_back(parent),
            Some(_) => {}
        }

        let Some(grandparent) = parent_node.parent() else {
            return;
        };
        let parallel = definition.node(grandparent);
        if !parallel.is_parallel() {
            return;
        }
        self.note(self.names.region_done(parallel.id(), parent_node.id()));

        let all_done = parallel.children().iter().all(|region| self.region_done(*region));
        if all_done {
            self.note(self.names.parallel_done(parallel.id()));
            if parallel.parent().is_none() {
                self.note(self.names.finish());
            }
            if parallel.on_done().is_some() {
                self.pending_done.push_back(grandparent);
            }
        }
    }

    fn region_done(&self, region: NodeId) -> bool {
        self.definition
            .node(region)
            .children()
            .iter()
            .any(|child| self.active.contains(child) && self.definition.node(*child).is_final())
    }

    fn run_actions(&mut self, actions: &[BehaviorRef], event: &EventEnvelope) -> Result<(), TransitionError> {
        let definition = self.definition;
        for reference in actions {
            let action = definition
                .behaviors()
                .get_action(&reference.name)
                .ok_or_else(|| TransitionError::MissingBehavior {
                    kind: BehaviorKind::Action,
                    name: reference.name.clone(),
                })?;

            self.note(self.names.action_start(&reference.name));
            let value = self.value();
            let mut raised = Vec::new();
            {
                let invocation = Invocation {
                    event,
                    value: &value,
                    args: &reference.args,
                };
                let mut scope = ActionScope::new(invocation, &mut raised);
                action
                    .execute(&mut self.context, &mut scope)
                    .map_err(|source| TransitionError::ActionFailed {
                        action: reference.name.clone(),
                        source,
                    })?;
            }
            self.validate_context()?;
            self.note(self.names.action_finish(&reference.name));

            for raised_event in raised {
                let raised_event = raised_event.with_source(EventSource::Internal);
                self.recorder.record(
                    self.names.raised(&raised_event.event_type),
                    EventSource::Internal,
                    raised_event.payload.clone(),
                    &value,
                    &self.context,
                );
                self.raised.push_back(raised_event);
            }
        }
        Ok(())
    }

    /// Run pending `onDone` transitions and `@always` transitions until
    /// nothing more applies.
    ///
    /// Reaching a configuration already visited while settling ends the
    /// chain.
    fn settle(&mut self, event: &EventEnvelope) -> Result<(), TransitionError> {
        let definition = self.definition;
        let mut visited: HashSet<Vec<NodeId>> = HashSet::new();
        visited.insert(self.active.iter().copied().collect());

        loop {
            let progressed = if let Some(handle) = self.pending_done.pop_front() {
                match definition.node(handle).on_done() {
                    Some(on_done) if self.active.contains(&handle) => self.take(on_done, event)?,
                    _ => continue,
                }
            } else if definition.handles_event(ALWAYS) {
                let always = EventEnvelope::internal(ALWAYS).with_version(event.version);
                self.step(&always)?
            } else {
                false
            };

            if !progressed {
                if self.pending_done.is_empty() {
                    return Ok(());
                }
                continue;
            }
            if !visited.insert(self.active.iter().copied().collect()) {
                tracing::debug!(
                    machine = self.definition.id(),
                    "settling reached a visited configuration"
                );
                self.pending_done.clear();
                return Ok(());
            }
        }
    }

    /// Process raised events one by one, each after the previous settled.
    fn drain_raised(&mut self) -> Result<(), TransitionError> {
        while let Some(event) = self.raised.pop_front() {
            check_event(self.definition, &event)?;
            self.record_event(&event);
            if self.step(&event)? {
                self.settle(&event)?;
            }
        }
        Ok(())
    }
}
