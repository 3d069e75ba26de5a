use serde::{Deserialize, Serialize};

use crate::ports::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionState {
    Idle,
    Building,
    Signing,
    Submitting,
    AwaitingConfirmation,
    Confirmed,
    Failed,
}

impl SubmissionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionState::Confirmed | SubmissionState::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        !matches!(self, SubmissionState::Idle) && !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionAction {
    Begin,
    Sign,
    Submit,
    Broadcast,
    Confirm,
    Fail,
    Settle,
    /// User-triggered reset of a stuck session.
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: SubmissionState,
    pub to: SubmissionState,
    pub reason: &'static str,
}

pub fn submission_transition(
    state: SubmissionState,
    action: SubmissionAction,
) -> Result<(SubmissionState, StateTransition), RelayError> {
    use SubmissionAction as A;
    use SubmissionState as S;

    let (to, reason) = match (state, action) {
        (S::Idle, A::Begin) => (S::Building, "submission_started"),
        (S::Building, A::Sign) => (S::Signing, "request_built"),
        (S::Building, A::Submit) => (S::Submitting, "payload_built"),
        (S::Signing, A::Submit) => (S::Submitting, "request_signed"),
        (S::Submitting, A::Broadcast) => (S::AwaitingConfirmation, "transaction_broadcast"),
        (S::AwaitingConfirmation, A::Confirm) => (S::Confirmed, "transaction_confirmed"),
        (S::Building | S::Signing | S::Submitting | S::AwaitingConfirmation, A::Fail) => {
            (S::Failed, "submission_failed")
        }
        (S::Confirmed | S::Failed, A::Settle) => (S::Idle, "session_settled"),
        (_, A::Reset) => (S::Idle, "manual_reset"),
        (from, action) => return Err(RelayError::IllegalTransition { from, action }),
    };

    Ok((
        to,
        StateTransition {
            from: state,
            to,
            reason,
        },
    ))
}
