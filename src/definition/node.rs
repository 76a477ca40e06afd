//! Arena nodes of a machine definition.

use serde_json::Value;
use std::fmt;

/// Handle of a node inside its definition's arena.
///
/// Handles are assigned in document order (pre-order), so comparing two
/// handles compares their position in the configuration and an ancestor
/// always sorts before its descendants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Kind of a state node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateKind {
    Atomic,
    Compound,
    Parallel,
    Final,
}

impl StateKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "atomic" => Some(Self::Atomic),
            "compound" => Some(Self::Compound),
            "parallel" => Some(Self::Parallel),
            "final" => Some(Self::Final),
            _ => None,
        }
    }

    /// Whether nodes of this kind are leaves of an active configuration.
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::Atomic | Self::Final)
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Atomic => "atomic",
            Self::Compound => "compound",
            Self::Parallel => "parallel",
            Self::Final => "final",
        };
        f.write_str(name)
    }
}

/// A named behavior with its arguments, written `"name"` or `"name:a,b"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BehaviorRef {
    pub name: String,
    pub args: Vec<String>,
}

impl BehaviorRef {
    pub fn parse(reference: &str) -> Self {
        match reference.split_once(':') {
            Some((name, args)) => Self {
                name: name.trim().to_string(),
                args: args.split(',').map(|arg| arg.trim().to_string()).collect(),
            },
            None => Self {
                name: reference.trim().to_string(),
                args: Vec::new(),
            },
        }
    }
}

impl fmt::Display for BehaviorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}:{}", self.name, self.args.join(","))
        }
    }
}

/// One candidate outcome of a transition.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionBranch {
    /// `None` for targetless branches, which only run actions.
    pub target: Option<NodeId>,
    pub guards: Vec<BehaviorRef>,
    pub actions: Vec<BehaviorRef>,
    pub calculators: Vec<BehaviorRef>,
    pub description: Option<String>,
}

impl TransitionBranch {
    pub fn is_guarded(&self) -> bool {
        !self.guards.is_empty()
    }
}

/// Branches a node declares for one event type.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub event: String,
    pub source: NodeId,
    pub branches: Vec<TransitionBranch>,
}

/// A node of the definition tree.
#[derive(Clone, Debug, PartialEq)]
pub struct StateNode {
    pub(crate) handle: NodeId,
    pub(crate) id: String,
    pub(crate) key: String,
    pub(crate) alias: Option<String>,
    pub(crate) kind: StateKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) initial: Option<NodeId>,
    pub(crate) depth: usize,
    pub(crate) entry: Vec<BehaviorRef>,
    pub(crate) exit: Vec<BehaviorRef>,
    pub(crate) transitions: Vec<Transition>,
    pub(crate) on_done: Option<Transition>,
    pub(crate) result: Option<BehaviorRef>,
    pub(crate) description: Option<String>,
    pub(crate) meta: Option<Value>,
}

impl StateNode {
    pub fn handle(&self) -> NodeId {
        self.handle
    }

    /// Fully qualified id: ancestor keys joined by the delimiter.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Key under the parent's `states`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Explicit `id` from the configuration, usable as `#alias`.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn initial(&self) -> Option<NodeId> {
        self.initial
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn entry(&self) -> &[BehaviorRef] {
        &self.entry
    }

    pub fn exit(&self) -> &[BehaviorRef] {
        &self.exit
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Branches declared for `event`, if any.
    pub fn transition(&self, event: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.event == event)
    }

    pub fn on_done(&self) -> Option<&Transition> {
        self.on_done.as_ref()
    }

    pub fn result(&self) -> Option<&BehaviorRef> {
        self.result.as_ref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    pub fn is_final(&self) -> bool {
        self.kind == StateKind::Final
    }

    pub fn is_parallel(&self) -> bool {
        self.kind == StateKind::Parallel
    }
}
