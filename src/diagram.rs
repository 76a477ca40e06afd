//! PlantUML state diagrams generated from definitions.

use crate::definition::{MachineDefinition, NodeId, StateKind, Transition, TransitionBranch};
use std::fmt::Write;

/// Render a definition as a PlantUML state diagram.
///
/// Compound and parallel nodes become nested states (parallel regions are
/// separated by `--`), final nodes point at `[*]`, and every transition
/// branch becomes an arrow labelled with its event, guards and actions.
/// Targetless branches are listed inside their source state.
///
/// # Example
///
/// ```rust
/// use eventchart::definition::MachineBuilder;
/// use eventchart::diagram::to_plantuml;
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
/// let uml = to_plantuml(&definition);
/// assert!(uml.starts_with("@startuml"));
/// assert!(uml.contains("light_green --> light_yellow : TIMER"));
/// ```
pub fn to_plantuml(definition: &MachineDefinition) -> String {
    let mut out = String::new();
    let root = definition.node(definition.root());

    let _ = writeln!(out, "@startuml");
    let _ = writeln!(out, "title {}", root.id());
    let _ = writeln!(out, "hide empty description");

    render_children(definition, definition.root(), 0, &mut out);

    for node in definition.nodes() {
        for transition in node.transitions().iter().chain(node.on_done()) {
            render_transition(definition, transition, &mut out);
        }
    }

    let _ = writeln!(out, "@enduml");
    out
}

fn render_children(definition: &MachineDefinition, parent: NodeId, depth: usize, out: &mut String) {
    let node = definition.node(parent);
    let indent = "  ".repeat(depth);

    if let Some(initial) = node.initial() {
        let _ = writeln!(out, "{indent}[*] --> {}", alias(definition, initial));
    }

    for (position, child) in node.children().iter().enumerate() {
        if node.kind() == StateKind::Parallel && position > 0 {
            let _ = writeln!(out, "{indent}--");
        }
        render_state(definition, *child, depth, out);
    }
}

fn render_state(definition: &MachineDefinition, handle: NodeId, depth: usize, out: &mut String) {
    let node = definition.node(handle);
    let indent = "  ".repeat(depth);
    let name = alias(definition, handle);
    let stereotype = match node.kind() {
        StateKind::Parallel => " <<parallel>>",
        _ => "",
    };

    if node.children().is_empty() {
        let _ = writeln!(out, "{indent}state \"{}\" as {name}{stereotype}", node.key());
    } else {
        let _ = writeln!(out, "{indent}state \"{}\" as {name}{stereotype} {{", node.key());
        render_children(definition, handle, depth + 1, out);
        let _ = writeln!(out, "{indent}}}");
    }

    for action in node.entry() {
        let _ = writeln!(out, "{indent}{name} : entry / {action}");
    }
    for action in node.exit() {
        let _ = writeln!(out, "{indent}{name} : exit / {action}");
    }
    for transition in node.transitions() {
        for branch in transition.branches.iter().filter(|b| b.target.is_none()) {
            let _ = writeln!(out, "{indent}{name} : {}", label(&transition.event, branch));
        }
    }
    if node.is_final() {
        let _ = writeln!(out, "{indent}{name} --> [*]");
    }
}

fn render_transition(definition: &MachineDefinition, transition: &Transition, out: &mut String) {
    let source = alias(definition, transition.source);
    for branch in &transition.branches {
        if let Some(target) = branch.target {
            let _ = writeln!(
                out,
                "{source} --> {} : {}",
                alias(definition, target),
                label(&transition.event, branch)
            );
        }
    }
}

fn label(event: &str, branch: &TransitionBranch) -> String {
    let mut label = event.to_string();
    if !branch.guards.is_empty() {
        let guards: Vec<String> = branch.guards.iter().map(ToString::to_string).collect();
        let _ = write!(label, " [{}]", guards.join(" && "));
    }
    if !branch.actions.is_empty() {
        let actions: Vec<String> = branch.actions.iter().map(ToString::to_string).collect();
        let _ = write!(label, " / {}", actions.join(", "));
    }
    label
}

/// PlantUML identifiers cannot contain the delimiter.
fn alias(definition: &MachineDefinition, handle: NodeId) -> String {
    definition
        .node(handle)
        .id()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
