mod common;

use alloy::primitives::U256;
use meta_relay_core::{
    CallEncoder, ErrorKind, PermissionOperation, PermissionState, SignerPort, SubmissionPath,
    SubmissionState,
};

use common::{context, grant, new_pipeline, new_pipeline_for, pipeline_with, OPERATOR, TOKEN};
use meta_relay_adapters::{LocalSignerAdapter, SimulatedChain};

#[tokio::test]
async fn direct_grant_sets_delete_permission() {
    let chain = SimulatedChain::default();
    let pipeline = new_pipeline(&chain);
    let owner = pipeline.owner();
    assert_ne!(owner, OPERATOR);

    let initial = pipeline.mount().await.expect("mount");
    assert_eq!(initial, PermissionState::NONE);

    let outcome = pipeline
        .execute(grant(), SubmissionPath::Direct)
        .await
        .expect("direct grant");
    assert!(outcome.confirmation.success);
    assert_eq!(outcome.permission, PermissionState(4));
    assert_eq!(outcome.batch_nonce, None);
    assert_eq!(chain.permission_of(TOKEN, owner, OPERATOR), 4);
    assert_eq!(pipeline.permission(), Some(PermissionState(4)));

    // Direct path never touches the forwarder nonce.
    assert_eq!(chain.nonce_of(owner, U256::ZERO), U256::ZERO);
    assert_eq!(pipeline.state(), SubmissionState::Idle);

    let reasons: Vec<_> = pipeline.history().iter().map(|t| t.reason).collect();
    assert_eq!(
        reasons,
        vec![
            "submission_started",
            "payload_built",
            "transaction_broadcast",
            "transaction_confirmed",
            "session_settled",
        ]
    );
}

#[tokio::test]
async fn confirmation_mounts_an_unmounted_mirror() {
    let chain = SimulatedChain::default();
    let pipeline = new_pipeline(&chain);
    assert_eq!(pipeline.permission(), None);

    let outcome = pipeline
        .execute(grant(), SubmissionPath::Direct)
        .await
        .expect("grant");
    assert_eq!(outcome.permission, PermissionState(4));
    assert_eq!(pipeline.permission(), Some(PermissionState(4)));
}

#[tokio::test]
async fn changes_from_another_session_show_up_on_explicit_refresh() {
    let chain = SimulatedChain::default();
    let key = alloy::signers::local::PrivateKeySigner::random();
    let watching = new_pipeline_for(&chain, key.clone());
    let acting = new_pipeline_for(&chain, key);
    watching.mount().await.expect("mount");

    acting
        .execute(grant(), SubmissionPath::Direct)
        .await
        .expect("grant");
    // Only the acting pipeline saw the confirmation.
    assert_eq!(watching.permission(), Some(PermissionState::NONE));

    let refreshed = watching.refresh_permission().await.expect("refresh");
    assert_eq!(refreshed, PermissionState(4));
    assert_eq!(watching.permission(), Some(PermissionState(4)));
}

#[tokio::test]
async fn direct_revoke_after_grant_clears_permission() {
    let chain = SimulatedChain::default();
    let pipeline = new_pipeline(&chain);
    pipeline.mount().await.expect("mount");

    pipeline
        .execute(grant(), SubmissionPath::Direct)
        .await
        .expect("grant");
    let outcome = pipeline
        .execute(PermissionOperation::Revoke, SubmissionPath::Direct)
        .await
        .expect("revoke");

    assert_eq!(outcome.permission, PermissionState::NONE);
    assert_eq!(chain.permission_of(TOKEN, pipeline.owner(), OPERATOR), 0);
}

#[tokio::test]
async fn operator_equal_to_owner_reverts_and_resets_session() {
    let chain = SimulatedChain::default();
    let signer = LocalSignerAdapter::new(alloy::signers::local::PrivateKeySigner::random());
    let mut ctx = context(&chain);
    ctx.operator = signer.address();
    let pipeline = pipeline_with(&chain, ctx, chain.clone(), signer);
    pipeline.mount().await.expect("mount");

    let err = pipeline
        .execute(grant(), SubmissionPath::Direct)
        .await
        .expect_err("grant to self must revert");
    assert_eq!(err.kind(), ErrorKind::ExecutionRevert);
    assert!(err.to_string().contains("operator is the sender"));
    assert!(!err.is_retryable());

    assert_eq!(pipeline.permission(), Some(PermissionState::NONE));
    assert_eq!(pipeline.state(), SubmissionState::Idle);
    let last_two: Vec<_> = pipeline
        .history()
        .iter()
        .rev()
        .take(2)
        .map(|t| t.to)
        .collect();
    assert_eq!(last_two, vec![SubmissionState::Idle, SubmissionState::Failed]);
}

#[tokio::test]
async fn provider_rejection_is_a_submission_error() {
    let chain = SimulatedChain::default();
    let pipeline = new_pipeline(&chain);
    chain.fail_next_submission("insufficient funds for gas");

    let err = pipeline
        .execute(grant(), SubmissionPath::Direct)
        .await
        .expect_err("must fail");
    assert_eq!(err.kind(), ErrorKind::Submission);
    assert!(err.to_string().contains("insufficient funds for gas"));
    assert_eq!(chain.transaction_count(), 0);
    assert_eq!(pipeline.state(), SubmissionState::Idle);

    // The next attempt is a fresh invocation and goes through.
    pipeline
        .execute(grant(), SubmissionPath::Direct)
        .await
        .expect("second attempt");
    assert_eq!(chain.permission_of(TOKEN, pipeline.owner(), OPERATOR), 4);
}

#[tokio::test]
async fn raw_call_is_dispatched_to_its_target() {
    let chain = SimulatedChain::default();
    let pipeline = new_pipeline(&chain);
    let d = chain.deployment();

    let inner = CallEncoder
        .encode_grant(TOKEN, OPERATOR, 2, Default::default(), Default::default())
        .expect("encode");
    let payload = CallEncoder.wrap_agreement_call(d.agreement, &inner, &Default::default());

    let outcome = pipeline
        .execute(
            PermissionOperation::Call {
                target: d.host,
                payload,
            },
            SubmissionPath::Direct,
        )
        .await
        .expect("raw call");
    assert_eq!(outcome.permission, PermissionState(2));
}
