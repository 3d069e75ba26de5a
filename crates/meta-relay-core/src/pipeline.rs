use std::sync::{Mutex, MutexGuard};

use alloy::primitives::{Address, U256};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::domain::{
    CallPayload, ConfirmationSignal, PermissionKey, PermissionOperation, PermissionState,
    SessionContext, SubmissionOutcome, SubmissionPath, TransactionHandle,
};
use crate::encoder::CallEncoder;
use crate::forward::{ForwardRequestBuilder, ForwardRequestParams};
use crate::permission::PermissionStateSync;
use crate::ports::{
    ClockPort, DigestPort, NoncePort, PermissionReadPort, ProviderPort, ReceiptPort, RelayError,
    RelayPort, SignerPort, TrustPort,
};
use crate::signature::SignatureService;
use crate::state_machine::{
    submission_transition, StateTransition, SubmissionAction, SubmissionState,
};
use crate::submitter::RelaySubmitter;
use crate::watcher::ConfirmationWatcher;

/// Identifies one accepted submission. Transitions carrying a stale ticket
/// (the session was reset underneath them) are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SessionTicket(u64);

#[derive(Debug)]
struct SessionInner {
    state: SubmissionState,
    epoch: u64,
    history: Vec<StateTransition>,
}

/// At most one submission per session.
#[derive(Debug)]
pub struct Session {
    inner: Mutex<SessionInner>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                state: SubmissionState::Idle,
                epoch: 0,
                history: Vec::new(),
            }),
        }
    }
}

impl Session {
    fn lock(&self) -> Result<MutexGuard<'_, SessionInner>, RelayError> {
        self.inner
            .lock()
            .map_err(|e| RelayError::Transport(format!("session lock poisoned: {e}")))
    }

    fn record(inner: &mut SessionInner, action: SubmissionAction) -> Result<(), RelayError> {
        let (next, transition) = submission_transition(inner.state, action)?;
        info!(
            from = ?transition.from,
            to = ?transition.to,
            reason = transition.reason,
            "submission transition"
        );
        inner.state = next;
        inner.history.push(transition);
        Ok(())
    }

    fn begin(&self) -> Result<SessionTicket, RelayError> {
        let mut g = self.lock()?;
        if g.state != SubmissionState::Idle {
            return Err(RelayError::Busy(g.state));
        }
        g.history.clear();
        g.epoch = g.epoch.wrapping_add(1);
        Self::record(&mut g, SubmissionAction::Begin)?;
        Ok(SessionTicket(g.epoch))
    }

    fn advance(&self, ticket: SessionTicket, action: SubmissionAction) -> Result<(), RelayError> {
        let mut g = self.lock()?;
        if g.epoch != ticket.0 {
            debug!(?action, "ignoring transition from a reset session");
            return Ok(());
        }
        Self::record(&mut g, action)
    }

    /// Drive a failed run to `Failed` and back to `Idle`.
    fn abandon(&self, ticket: SessionTicket) -> Result<(), RelayError> {
        let mut g = self.lock()?;
        if g.epoch != ticket.0 {
            return Ok(());
        }
        if g.state.is_in_flight() {
            Self::record(&mut g, SubmissionAction::Fail)?;
        }
        if g.state.is_terminal() {
            Self::record(&mut g, SubmissionAction::Settle)?;
        }
        Ok(())
    }

    pub fn state(&self) -> SubmissionState {
        self.lock()
            .map(|g| g.state)
            .unwrap_or(SubmissionState::Failed)
    }

    /// Transitions of the current or most recent submission.
    pub fn history(&self) -> Vec<StateTransition> {
        self.lock().map(|g| g.history.clone()).unwrap_or_default()
    }

    /// Clear a stuck session. A transaction that was already broadcast is
    /// unaffected; its eventual result is no longer reported here.
    pub fn reset(&self) -> Result<SubmissionState, RelayError> {
        let mut g = self.lock()?;
        let previous = g.state;
        warn!(state = ?previous, "manual session reset");
        g.epoch = g.epoch.wrapping_add(1);
        Self::record(&mut g, SubmissionAction::Reset)?;
        Ok(previous)
    }
}

/// Grant, revoke or call through either submission path and keep the
/// permission mirror in step with the chain.
///
/// The stages are private so every dispatch goes through [`Pipeline::execute`]
/// and its session.
pub struct Pipeline<N, C, D, G, P, R, T, K, A>
where
    N: NoncePort,
    C: ClockPort,
    D: DigestPort,
    G: SignerPort,
    P: ProviderPort,
    R: RelayPort,
    T: TrustPort,
    K: ReceiptPort,
    A: PermissionReadPort,
{
    context: SessionContext,
    encoder: CallEncoder,
    builder: ForwardRequestBuilder<N, C>,
    signatures: SignatureService<D, G>,
    submitter: RelaySubmitter<P, R, T>,
    watcher: ConfirmationWatcher<K>,
    permissions: PermissionStateSync<A>,
    session: Session,
}

impl<N, C, D, G, P, R, T, K, A> Pipeline<N, C, D, G, P, R, T, K, A>
where
    N: NoncePort,
    C: ClockPort,
    D: DigestPort,
    G: SignerPort,
    P: ProviderPort,
    R: RelayPort,
    T: TrustPort,
    K: ReceiptPort,
    A: PermissionReadPort,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: SessionContext,
        nonces: N,
        clock: C,
        digests: D,
        signer: G,
        provider: P,
        relay: R,
        trust: T,
        receipts: K,
        reader: A,
    ) -> Self {
        let agreement = context.agreement;
        Self {
            context,
            encoder: CallEncoder,
            builder: ForwardRequestBuilder::new(nonces, clock),
            signatures: SignatureService::new(digests, signer),
            submitter: RelaySubmitter::new(provider, relay, trust),
            watcher: ConfirmationWatcher::new(receipts),
            permissions: PermissionStateSync::new(reader, agreement),
            session: Session::default(),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Relay backend, for readiness checks ahead of a submission.
    pub fn relay(&self) -> &R {
        &self.submitter.relay
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfirmationSignal> {
        self.watcher.subscribe()
    }

    pub fn owner(&self) -> Address {
        self.signatures.signer_address()
    }

    pub fn permission_key(&self) -> PermissionKey {
        PermissionKey {
            token: self.context.token,
            owner: self.owner(),
            operator: self.context.operator,
        }
    }

    /// Initial read of the permission for the configured token and operator.
    pub async fn mount(&self) -> Result<PermissionState, RelayError> {
        self.permissions.mount(self.permission_key()).await
    }

    pub async fn refresh_permission(&self) -> Result<PermissionState, RelayError> {
        match self.permissions.tracked_key()? {
            Some(_) => self.permissions.refresh_tracked().await,
            None => self.mount().await,
        }
    }

    pub fn permission(&self) -> Option<PermissionState> {
        self.permissions.current()
    }

    pub fn state(&self) -> SubmissionState {
        self.session.state()
    }

    pub fn history(&self) -> Vec<StateTransition> {
        self.session.history()
    }

    pub fn reset_session(&self) -> Result<SubmissionState, RelayError> {
        self.session.reset()
    }

    /// Run one operation to confirmation.
    ///
    /// Fails with `Busy` while another submission of this session is in
    /// flight. Nothing is retried.
    pub async fn execute(
        &self,
        operation: PermissionOperation,
        path: SubmissionPath,
    ) -> Result<SubmissionOutcome, RelayError> {
        let ticket = self.session.begin()?;
        info!(operation = operation.label(), ?path, owner = %self.owner(), "submission accepted");

        match self.run(ticket, &operation, path).await {
            Ok(outcome) => {
                self.session.advance(ticket, SubmissionAction::Settle)?;
                Ok(outcome)
            }
            Err(err) => {
                warn!(
                    operation = operation.label(),
                    kind = ?err.kind(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "submission failed"
                );
                self.session.abandon(ticket)?;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        ticket: SessionTicket,
        operation: &PermissionOperation,
        path: SubmissionPath,
    ) -> Result<SubmissionOutcome, RelayError> {
        let from = self.owner();
        let (to, data) = self.payload_for(operation, path)?;

        let (handle, batch_nonce) = match path {
            SubmissionPath::Direct => {
                self.session.advance(ticket, SubmissionAction::Submit)?;
                let handle = self.submitter.submit_direct(&data, from, to).await?;
                (handle, None)
            }
            SubmissionPath::Relay(scheme) => {
                let gas = &self.context.gas;
                let request = self
                    .builder
                    .build(ForwardRequestParams {
                        from,
                        to,
                        token: self.context.fee_token,
                        tx_gas: gas.tx_gas,
                        token_gas_price: gas.token_gas_price,
                        batch_id: gas.batch_id,
                        deadline_offset_secs: gas.deadline_offset_secs,
                        data,
                    })
                    .await?;

                self.session.advance(ticket, SubmissionAction::Sign)?;
                let auth = self
                    .signatures
                    .authorize(scheme, &request, &self.context.forwarder_domain())
                    .await?;

                self.session.advance(ticket, SubmissionAction::Submit)?;
                let handle = self
                    .submitter
                    .submit_via_relay(
                        &request,
                        &auth,
                        self.context.forwarder,
                        self.context.preflight_trusted_forwarder,
                    )
                    .await?;
                (handle, Some(request.batchNonce))
            }
        };

        self.session.advance(ticket, SubmissionAction::Broadcast)?;
        self.confirm(ticket, handle, path, batch_nonce).await
    }

    async fn confirm(
        &self,
        ticket: SessionTicket,
        handle: TransactionHandle,
        path: SubmissionPath,
        batch_nonce: Option<U256>,
    ) -> Result<SubmissionOutcome, RelayError> {
        let confirmation = self.watcher.await_once(handle).await?;
        if !confirmation.success {
            return Err(RelayError::ExecutionRevert(
                confirmation
                    .revert_reason
                    .clone()
                    .unwrap_or_else(|| format!("transaction {} reverted", confirmation.tx_hash)),
            ));
        }
        self.session.advance(ticket, SubmissionAction::Confirm)?;

        let permission = match self.permissions.handle_signal(&confirmation.signal()).await? {
            Some(state) => state,
            None => self.mount().await?,
        };
        Ok(SubmissionOutcome {
            path,
            confirmation,
            permission,
            batch_nonce,
        })
    }

    /// Destination and calldata for `operation` on `path`.
    fn payload_for(
        &self,
        operation: &PermissionOperation,
        path: SubmissionPath,
    ) -> Result<(Address, CallPayload), RelayError> {
        let ctx = &self.context;
        let inner = match operation {
            PermissionOperation::Grant { level, allowance } => self.encoder.encode_grant(
                ctx.token,
                ctx.operator,
                *level,
                *allowance,
                Default::default(),
            )?,
            PermissionOperation::Revoke => {
                self.encoder
                    .encode_revoke(ctx.token, ctx.operator, Default::default())
            }
            PermissionOperation::Call { target, payload } => {
                return Ok((*target, payload.clone()));
            }
        };

        let payload = match path {
            SubmissionPath::Direct => {
                self.encoder
                    .wrap_agreement_call(ctx.agreement, &inner, &ctx.user_data)
            }
            SubmissionPath::Relay(_) => {
                let operation =
                    self.encoder
                        .call_agreement_operation(ctx.agreement, &inner, &ctx.user_data);
                self.encoder.wrap_batch(vec![operation])?.payload
            }
        };
        Ok((ctx.host, payload))
    }
}
