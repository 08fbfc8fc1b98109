//! Per-step retry state machine.
//!
//! The machine is a pure transition function; the step runner feeds it events
//! produced by dispatch and correction requests.

/// State of one step's attempt cycle. Attempt indices are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// About to dispatch attempt `k`.
    Attempting(u32),
    /// Attempt `k` failed and a correction is being requested.
    AwaitingCorrection(u32),
    Succeeded,
    Failed,
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// The current attempt returned a result, classified as `failed` or not.
    Dispatched { failed: bool },
    /// The language model proposed a replacement step.
    Corrected,
    /// No usable correction could be obtained.
    CorrectionUnavailable,
    /// Dispatch itself errored instead of returning a result.
    Aborted,
}

impl StepState {
    pub fn initial() -> Self {
        StepState::Attempting(0)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Succeeded | StepState::Failed)
    }
}

/// Compute the next state. Terminal states absorb every event, and events
/// that do not apply to the current state leave it unchanged.
pub fn transition(state: StepState, event: StepEvent, max_retries: u32) -> StepState {
    match (state, event) {
        (StepState::Succeeded | StepState::Failed, _) => state,
        (_, StepEvent::Aborted) => StepState::Failed,
        (StepState::Attempting(_), StepEvent::Dispatched { failed: false }) => StepState::Succeeded,
        (StepState::Attempting(k), StepEvent::Dispatched { failed: true }) if k < max_retries => {
            StepState::AwaitingCorrection(k)
        }
        (StepState::Attempting(_), StepEvent::Dispatched { failed: true }) => StepState::Failed,
        (StepState::AwaitingCorrection(k), StepEvent::Corrected) => StepState::Attempting(k + 1),
        (StepState::AwaitingCorrection(_), StepEvent::CorrectionUnavailable) => StepState::Failed,
        (state, _) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u32 = 2;

    fn run(events: &[StepEvent]) -> StepState {
        events
            .iter()
            .fold(StepState::initial(), |state, event| transition(state, *event, MAX))
    }

    #[test]
    fn success_on_first_attempt() {
        assert_eq!(
            run(&[StepEvent::Dispatched { failed: false }]),
            StepState::Succeeded
        );
    }

    #[test]
    fn failure_then_correction_retries_next_attempt() {
        let state = run(&[StepEvent::Dispatched { failed: true }, StepEvent::Corrected]);
        assert_eq!(state, StepState::Attempting(1));
    }

    #[test]
    fn failure_on_last_attempt_is_terminal() {
        let failed = StepEvent::Dispatched { failed: true };
        let state = run(&[
            failed,
            StepEvent::Corrected,
            failed,
            StepEvent::Corrected,
            failed,
        ]);
        assert_eq!(state, StepState::Failed);
    }

    #[test]
    fn missing_correction_fails_without_spending_retries() {
        let state = run(&[
            StepEvent::Dispatched { failed: true },
            StepEvent::CorrectionUnavailable,
        ]);
        assert_eq!(state, StepState::Failed);
    }

    #[test]
    fn abort_fails_from_any_live_state() {
        assert_eq!(run(&[StepEvent::Aborted]), StepState::Failed);
        assert_eq!(
            transition(StepState::AwaitingCorrection(0), StepEvent::Aborted, MAX),
            StepState::Failed
        );
    }

    #[test]
    fn terminal_states_absorb_events() {
        assert_eq!(
            transition(StepState::Succeeded, StepEvent::Aborted, MAX),
            StepState::Succeeded
        );
        assert_eq!(
            transition(StepState::Failed, StepEvent::Corrected, MAX),
            StepState::Failed
        );
    }

    #[test]
    fn zero_retries_fails_immediately() {
        assert_eq!(
            transition(
                StepState::Attempting(0),
                StepEvent::Dispatched { failed: true },
                0
            ),
            StepState::Failed
        );
    }

    #[test]
    fn out_of_place_events_are_ignored() {
        assert_eq!(
            transition(StepState::Attempting(1), StepEvent::Corrected, MAX),
            StepState::Attempting(1)
        );
    }
}
