//! State threaded through one provisioning run

use super::{StepName, StepOutcome};

/// Facts discovered or established by the steps of a single run.
///
/// Created fresh per run and dropped at the end; nothing is persisted. Only
/// steps mutate it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowContext {
    /// cert-manager is installed (found or applied by step 1)
    pub controller_installed: bool,
    /// The CA key pair secret exists (found or generated by step 2)
    pub ca_secret_present: bool,
    /// The leaf certificate was requested during this run (step 4)
    pub certificate_requested: bool,
    history: Vec<(StepName, StepOutcome)>,
}

impl WorkflowContext {
    /// Empty context for a new run
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how a step finished
    pub fn record(&mut self, step: StepName, outcome: StepOutcome) {
        self.history.push((step, outcome));
    }

    /// Steps finished so far, in order
    pub fn history(&self) -> &[(StepName, StepOutcome)] {
        &self.history
    }

    /// Outcome of `step`, if it has finished
    pub fn outcome(&self, step: StepName) -> Option<StepOutcome> {
        self.history
            .iter()
            .find(|(name, _)| *name == step)
            .map(|(_, outcome)| *outcome)
    }

    /// Number of steps that did work rather than skip
    pub fn executed_count(&self) -> usize {
        self.history
            .iter()
            .filter(|(_, outcome)| *outcome == StepOutcome::Executed)
            .count()
    }
}
