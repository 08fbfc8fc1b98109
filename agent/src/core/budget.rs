//! Global step budget shared by all steps of one workflow run.

/// Hard cap on executed steps, independent of per-step retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBudget {
    max_steps: usize,
}

impl StepBudget {
    pub fn new(max_steps: usize) -> Self {
        Self { max_steps }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// True once `executed` steps have used up the budget.
    pub fn is_exhausted(&self, executed: usize) -> bool {
        executed >= self.max_steps
    }

    pub fn remaining(&self, executed: usize) -> usize {
        self.max_steps.saturating_sub(executed)
    }
}
