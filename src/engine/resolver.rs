//! Branch selection for a single transition.

use super::error::TransitionError;
use super::lifecycle::{Lifecycle, Recorder};
use crate::core::{BehaviorKind, ContextManager, EventEnvelope, Invocation};
use crate::definition::{MachineDefinition, Transition, TransitionBranch};

/// The branch a transition takes, with the context its calculators produced.
#[derive(Debug)]
pub struct Resolution<'t> {
    pub branch: &'t TransitionBranch,
    pub context: ContextManager,
}

/// Picks the first matching branch of a transition.
///
/// Branches are tried in declaration order. For each one the calculators
/// run first, on a scratch copy of the context, then the guards are
/// evaluated left to right until one fails. A branch without guards always
/// matches. Calculator effects are only kept if some branch is selected.
pub struct TransitionResolver<'d> {
    definition: &'d MachineDefinition,
}

impl<'d> TransitionResolver<'d> {
    pub fn new(definition: &'d MachineDefinition) -> Self {
        Self { definition }
    }

    pub(crate) fn resolve<'t>(
        &self,
        transition: &'t Transition,
        context: &ContextManager,
        event: &EventEnvelope,
        value: &[String],
        recorder: &mut Recorder,
    ) -> Result<Option<Resolution<'t>>, TransitionError> {
        let names = Lifecycle::new(self.definition.id());
        let behaviors = self.definition.behaviors();
        let mut scratch = context.clone();

        for branch in &transition.branches {
            for reference in &branch.calculators {
                let calculator = behaviors.get_calculator(&reference.name).ok_or_else(|| {
                    TransitionError::MissingBehavior {
                        kind: BehaviorKind::Calculator,
                        name: reference.name.clone(),
                    }
                })?;
                let invocation = Invocation {
                    event,
                    value,
                    args: &reference.args,
                };
                calculator
                    .calculate(&mut scratch, &invocation)
                    .map_err(|source| TransitionError::CalculatorFailed {
                        calculator: reference.name.clone(),
                        source,
                    })?;
                recorder.internal(names.calculator(&reference.name, true), value, &scratch);
            }

            let mut matched = true;
            for reference in &branch.guards {
                let guard = behaviors.get_guard(&reference.name).ok_or_else(|| {
                    TransitionError::MissingBehavior {
                        kind: BehaviorKind::Guard,
                        name: reference.name.clone(),
                    }
                })?;
                let invocation = Invocation {
                    event,
                    value,
                    args: &reference.args,
                };
                let passed = guard.check(&scratch, &invocation);
                recorder.internal(names.guard(&reference.name, passed), value, &scratch);
                if !passed {
                    matched = false;
                    break;
                }
            }

            if matched {
                tracing::trace!(
                    machine = self.definition.id(),
                    event = %event.event_type,
                    source = self.definition.node(transition.source).id(),
                    "branch selected"
                );
                return Ok(Some(Resolution {
                    branch,
                    context: scratch,
                }));
            }
        }

        Ok(None)
    }
}
