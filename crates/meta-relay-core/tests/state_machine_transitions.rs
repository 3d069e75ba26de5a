use meta_relay_core::{
    submission_transition, ErrorKind, SubmissionAction, SubmissionState,
};

#[test]
fn relay_happy_path_transitions() {
    let (s1, _) =
        submission_transition(SubmissionState::Idle, SubmissionAction::Begin).expect("idle -> begin");
    assert_eq!(s1, SubmissionState::Building);
    let (s2, _) = submission_transition(s1, SubmissionAction::Sign).expect("building -> sign");
    assert_eq!(s2, SubmissionState::Signing);
    let (s3, _) = submission_transition(s2, SubmissionAction::Submit).expect("signing -> submit");
    assert_eq!(s3, SubmissionState::Submitting);
    let (s4, _) =
        submission_transition(s3, SubmissionAction::Broadcast).expect("submitting -> awaiting");
    assert_eq!(s4, SubmissionState::AwaitingConfirmation);
    let (s5, _) = submission_transition(s4, SubmissionAction::Confirm).expect("awaiting -> confirmed");
    assert_eq!(s5, SubmissionState::Confirmed);
    let (s6, t) = submission_transition(s5, SubmissionAction::Settle).expect("confirmed -> idle");
    assert_eq!(s6, SubmissionState::Idle);
    assert_eq!(t.reason, "session_settled");
}

#[test]
fn direct_path_skips_signing() {
    let (s, t) = submission_transition(SubmissionState::Building, SubmissionAction::Submit)
        .expect("building -> submitting");
    assert_eq!(s, SubmissionState::Submitting);
    assert_eq!(t.from, SubmissionState::Building);
    assert_eq!(t.reason, "payload_built");
}

#[test]
fn every_in_flight_state_can_fail() {
    for state in [
        SubmissionState::Building,
        SubmissionState::Signing,
        SubmissionState::Submitting,
        SubmissionState::AwaitingConfirmation,
    ] {
        let (s, _) = submission_transition(state, SubmissionAction::Fail).expect("in flight -> failed");
        assert_eq!(s, SubmissionState::Failed);
    }
}

#[test]
fn begin_outside_idle_is_rejected() {
    let err = submission_transition(SubmissionState::Submitting, SubmissionAction::Begin)
        .expect_err("must fail");
    assert_eq!(err.kind(), ErrorKind::IllegalTransition);
    assert!(err.to_string().contains("illegal submission transition"));
}

#[test]
fn confirm_before_broadcast_is_rejected() {
    let err = submission_transition(SubmissionState::Signing, SubmissionAction::Confirm)
        .expect_err("must fail");
    assert_eq!(err.kind(), ErrorKind::IllegalTransition);
}

#[test]
fn idle_cannot_fail_or_settle() {
    submission_transition(SubmissionState::Idle, SubmissionAction::Fail).expect_err("idle fail");
    submission_transition(SubmissionState::Idle, SubmissionAction::Settle).expect_err("idle settle");
}

#[test]
fn reset_returns_any_state_to_idle() {
    for state in [
        SubmissionState::Idle,
        SubmissionState::Signing,
        SubmissionState::AwaitingConfirmation,
        SubmissionState::Failed,
    ] {
        let (s, t) = submission_transition(state, SubmissionAction::Reset).expect("reset");
        assert_eq!(s, SubmissionState::Idle);
        assert_eq!(t.reason, "manual_reset");
    }
}

#[test]
fn in_flight_and_terminal_are_disjoint() {
    assert!(!SubmissionState::Idle.is_in_flight());
    assert!(SubmissionState::AwaitingConfirmation.is_in_flight());
    assert!(SubmissionState::Confirmed.is_terminal());
    assert!(!SubmissionState::Failed.is_in_flight());
}
