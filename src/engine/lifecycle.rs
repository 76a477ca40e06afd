//! Names of the internal events recorded while a machine runs.
//!
//! Every observable step of an interpretation (entering a state, running
//! an action, evaluating a guard) becomes an internal [`EventDraft`] named
//! after the machine, so a chain reads as an execution trace:
//!
//! ```text
//! light.transition.light.green.TIMER.start
//! light.state.light.green.exit
//! light.state.light.yellow.enter
//! light.transition.light.green.TIMER.finish
//! ```

use crate::core::{ContextManager, EventSource};
use crate::store::EventDraft;
use serde_json::Value;

/// Builds lifecycle event names for one machine.
#[derive(Clone, Copy, Debug)]
pub struct Lifecycle<'a> {
    machine: &'a str,
}

impl<'a> Lifecycle<'a> {
    pub fn new(machine: &'a str) -> Self {
        Self { machine }
    }

    pub fn start(&self) -> String {
        format!("{}.start", self.machine)
    }

    pub fn finish(&self) -> String {
        format!("{}.finish", self.machine)
    }

    pub fn state_enter(&self, state: &str) -> String {
        format!("{}.state.{state}.enter", self.machine)
    }

    pub fn state_exit(&self, state: &str) -> String {
        format!("{}.state.{state}.exit", self.machine)
    }

    pub fn state_done(&self, state: &str) -> String {
        format!("{}.state.{state}.done", self.machine)
    }

    pub fn transition_start(&self, source: &str, event: &str) -> String {
        format!("{}.transition.{source}.{event}.start", self.machine)
    }

    pub fn transition_finish(&self, source: &str, event: &str) -> String {
        format!("{}.transition.{source}.{event}.finish", self.machine)
    }

    pub fn action_start(&self, action: &str) -> String {
        format!("{}.action.{action}.start", self.machine)
    }

    pub fn action_finish(&self, action: &str) -> String {
        format!("{}.action.{action}.finish", self.machine)
    }

    pub fn guard(&self, guard: &str, passed: bool) -> String {
        format!("{}.guard.{guard}.{}", self.machine, outcome(passed))
    }

    pub fn calculator(&self, calculator: &str, passed: bool) -> String {
        format!("{}.calculator.{calculator}.{}", self.machine, outcome(passed))
    }

    pub fn raised(&self, event: &str) -> String {
        format!("{}.event.{event}.raised", self.machine)
    }

    pub fn region_enter(&self, parallel: &str, region: &str) -> String {
        format!("{}.parallel.{parallel}.region.{region}.enter", self.machine)
    }

    pub fn region_done(&self, parallel: &str, region: &str) -> String {
        format!("{}.parallel.{parallel}.region.{region}.done", self.machine)
    }

    pub fn parallel_done(&self, parallel: &str) -> String {
        format!("{}.parallel.{parallel}.done", self.machine)
    }
}

fn outcome(passed: bool) -> &'static str {
    if passed {
        "pass"
    } else {
        "fail"
    }
}

/// Collects the drafts of one interpretation in execution order.
#[derive(Debug)]
pub(crate) struct Recorder {
    version: u32,
    drafts: Vec<EventDraft>,
}

impl Recorder {
    pub(crate) fn new(version: u32) -> Self {
        Self {
            version,
            drafts: Vec::new(),
        }
    }

    pub(crate) fn record(
        &mut self,
        event_type: String,
        source: EventSource,
        payload: Option<Value>,
        value: &[String],
        context: &ContextManager,
    ) {
        self.drafts.push(EventDraft {
            event_type,
            source,
            payload,
            machine_value: value.to_vec(),
            context: context.data().clone(),
            version: self.version,
        });
    }

    /// Record an engine lifecycle event without payload.
    pub(crate) fn internal(&mut self, event_type: String, value: &[String], context: &ContextManager) {
        self.record(event_type, EventSource::Internal, None, value, context);
    }

    pub(crate) fn into_drafts(self) -> Vec<EventDraft> {
        self.drafts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_catalogue() {
        let names = Lifecycle::new("light");

        assert_eq!(names.start(), "light.start");
        assert_eq!(names.state_enter("light.green"), "light.state.light.green.enter");
        assert_eq!(
            names.transition_finish("light.green", "TIMER"),
            "light.transition.light.green.TIMER.finish"
        );
        assert_eq!(names.guard("isReady", false), "light.guard.isReady.fail");
        assert_eq!(names.calculator("total", true), "light.calculator.total.pass");
        assert_eq!(
            names.region_done("light.p", "light.p.a"),
            "light.parallel.light.p.region.light.p.a.done"
        );
    }

    #[test]
    fn recorder_keeps_execution_order_and_snapshots() {
        let mut recorder = Recorder::new(3);
        let mut context = ContextManager::new();
        context.set("n", 1);
        recorder.internal("m.start".into(), &[], &context);
        context.set("n", 2);
        recorder.internal("m.state.m.a.enter".into(), &["m.a".to_string()], &context);

        let drafts = recorder.into_drafts();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].context.get("n"), Some(&serde_json::json!(1)));
        assert_eq!(drafts[1].machine_value, vec!["m.a".to_string()]);
        assert!(drafts.iter().all(|d| d.version == 3 && d.source == EventSource::Internal));
    }
}
