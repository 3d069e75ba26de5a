use alloy::primitives::{Address, Bytes, B256, U256};
use thiserror::Error;

use crate::domain::{
    Digest, ForwardRequest, ForwarderDomain, PermissionKey, PermissionState, Receipt,
    SigningScheme, TypedSigningPayload,
};
use crate::state_machine::{SubmissionAction, SubmissionState};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("nonce fetch failed: {0}")]
    NonceFetch(String),
    #[error("signing rejected: {0}")]
    SigningRejected(String),
    #[error("signature recovers to {recovered}, expected {expected}")]
    SignatureMismatch { expected: Address, recovered: Address },
    #[error("untrusted forwarder: {0}")]
    UntrustedForwarder(String),
    #[error("submission rejected: {0}")]
    Submission(String),
    #[error("execution reverted: {0}")]
    ExecutionRevert(String),
    #[error("SESSION_BUSY: submission already in flight ({0:?})")]
    Busy(SubmissionState),
    #[error("illegal submission transition: {action:?} from {from:?}")]
    IllegalTransition {
        from: SubmissionState,
        action: SubmissionAction,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Encoding,
    NonceFetch,
    SigningRejected,
    SignatureMismatch,
    UntrustedForwarder,
    Submission,
    ExecutionRevert,
    Busy,
    IllegalTransition,
    Transport,
    Config,
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Encoding(_) => ErrorKind::Encoding,
            RelayError::NonceFetch(_) => ErrorKind::NonceFetch,
            RelayError::SigningRejected(_) => ErrorKind::SigningRejected,
            RelayError::SignatureMismatch { .. } => ErrorKind::SignatureMismatch,
            RelayError::UntrustedForwarder(_) => ErrorKind::UntrustedForwarder,
            RelayError::Submission(_) => ErrorKind::Submission,
            RelayError::ExecutionRevert(_) => ErrorKind::ExecutionRevert,
            RelayError::Busy(_) => ErrorKind::Busy,
            RelayError::IllegalTransition { .. } => ErrorKind::IllegalTransition,
            RelayError::Transport(_) => ErrorKind::Transport,
            RelayError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether a fresh re-invocation can reasonably succeed without a
    /// configuration change. Nothing in the pipeline retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::NonceFetch(_) | RelayError::Transport(_))
    }
}

pub trait ClockPort {
    /// Unix time in seconds.
    fn now_secs(&self) -> Result<u64, RelayError>;
}

#[allow(async_fn_in_trait)]
pub trait NoncePort {
    /// Next nonce the forwarder expects for `(from, batch_id)`.
    async fn get_nonce(&self, from: Address, batch_id: U256) -> Result<U256, RelayError>;
}

/// Digest plus domain binding produced for one scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestParts {
    pub digest: Digest,
    pub domain_separator: Option<B256>,
}

#[allow(async_fn_in_trait)]
pub trait DigestPort {
    async fn digest(
        &self,
        scheme: SigningScheme,
        request: &ForwardRequest,
        domain: &ForwarderDomain,
    ) -> Result<DigestParts, RelayError>;
}

#[allow(async_fn_in_trait)]
pub trait SignerPort {
    fn address(&self) -> Address;
    /// EIP-191 personal message signature; the signer applies the prefix.
    async fn sign_message(&self, message: &[u8]) -> Result<Bytes, RelayError>;
    async fn sign_typed_data(&self, payload: &TypedSigningPayload) -> Result<Bytes, RelayError>;
}

#[allow(async_fn_in_trait)]
pub trait ProviderPort {
    /// Broadcast a transaction paid by `from`.
    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: &Bytes,
    ) -> Result<B256, RelayError>;
}

/// Forwarder call handed to the relay service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedCall {
    pub signer: Address,
    pub forwarder: Address,
    pub scheme: SigningScheme,
    pub data: Bytes,
    pub gas_limit: U256,
}

#[allow(async_fn_in_trait)]
pub trait RelayPort {
    /// Estimate and broadcast a forwarder call; the relay pays gas.
    async fn relay(&self, call: &RelayedCall) -> Result<B256, RelayError>;
}

#[allow(async_fn_in_trait)]
pub trait TrustPort {
    async fn is_trusted_forwarder(
        &self,
        target: Address,
        forwarder: Address,
    ) -> Result<bool, RelayError>;
}

#[allow(async_fn_in_trait)]
pub trait ReceiptPort {
    /// Resolves once the transaction is included. No timeout.
    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<Receipt, RelayError>;
}

#[allow(async_fn_in_trait)]
pub trait PermissionReadPort {
    async fn read_operator_permission(
        &self,
        agreement: Address,
        key: PermissionKey,
    ) -> Result<PermissionState, RelayError>;
}
