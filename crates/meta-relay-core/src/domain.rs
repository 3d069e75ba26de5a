use alloy::primitives::{aliases::I96, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::contracts::{ERC20ForwardRequest, Operation};

/// Forward request as signed by the caller and verified by the forwarder.
pub type ForwardRequest = ERC20ForwardRequest;

/// Hash a signature is produced over.
pub type Digest = B256;

/// Authorization level of an operator over a token, as stored by the agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionState(pub u8);

impl PermissionState {
    pub const NONE: Self = Self(0);

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn allows(self, flag: u8) -> bool {
        self.0 & flag == flag
    }
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encoded function invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallPayload(pub Bytes);

impl CallPayload {
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn selector(&self) -> Option<[u8; 4]> {
        let head = self.0.get(0..4)?;
        let mut selector = [0u8; 4];
        selector.copy_from_slice(head);
        Some(selector)
    }
}

/// Host batch call together with the operations it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEnvelope {
    pub operations: Vec<Operation>,
    pub payload: CallPayload,
}

/// Identifier of a broadcast transaction.
///
/// Deliberately neither `Clone` nor `Copy`: awaiting confirmation consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct TransactionHandle(B256);

impl TransactionHandle {
    pub fn new(hash: B256) -> Self {
        Self(hash)
    }

    pub fn hash(&self) -> B256 {
        self.0
    }
}

/// How the signer authorizes a forward request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningScheme {
    PersonalSign,
    TypedData,
}

/// Which submission flow the pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionPath {
    Direct,
    Relay(SigningScheme),
}

impl SubmissionPath {
    pub fn is_relay(self) -> bool {
        matches!(self, SubmissionPath::Relay(_))
    }
}

/// EIP-712 domain the forwarder registered for typed-data requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwarderDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

/// Gas parameters copied into every forward request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPolicy {
    pub tx_gas: U256,
    pub token_gas_price: U256,
    pub batch_id: U256,
    pub deadline_offset_secs: u64,
}

/// Explicit per-session configuration passed through the pipeline.
///
/// The owner is not part of the context; it is always the active signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub chain_id: u64,
    pub host: Address,
    pub agreement: Address,
    pub forwarder: Address,
    pub token: Address,
    pub operator: Address,
    /// Zero address: the forwarder covers gas and no fee token is charged.
    pub fee_token: Address,
    pub gas: GasPolicy,
    pub domain_name: String,
    pub domain_version: String,
    pub user_data: Bytes,
    pub preflight_trusted_forwarder: bool,
}

impl SessionContext {
    pub fn forwarder_domain(&self) -> ForwarderDomain {
        ForwarderDomain {
            name: self.domain_name.clone(),
            version: self.domain_version.clone(),
            chain_id: self.chain_id,
            verifying_contract: self.forwarder,
        }
    }
}

/// What the pipeline is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOperation {
    Grant { level: u8, allowance: I96 },
    Revoke,
    /// Arbitrary pre-encoded call against `target`.
    Call { target: Address, payload: CallPayload },
}

impl PermissionOperation {
    pub fn label(&self) -> &'static str {
        match self {
            PermissionOperation::Grant { .. } => "grant",
            PermissionOperation::Revoke => "revoke",
            PermissionOperation::Call { .. } => "call",
        }
    }
}

/// Signature plus whatever the forwarder needs to re-derive its digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAuthorization {
    pub scheme: SigningScheme,
    pub digest: Digest,
    pub signature: Bytes,
    /// Present for `TypedData` only.
    pub domain_separator: Option<B256>,
}

/// Material handed to a signer for the typed-data scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedSigningPayload {
    pub signing_hash: B256,
    /// `eth_signTypedData_v4` JSON document for wallet-backed signers.
    pub typed_data: serde_json::Value,
}

/// Receipt as reported by the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub success: bool,
    pub revert_reason: Option<String>,
}

/// Result of awaiting a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub tx_hash: B256,
    pub block_number: u64,
    pub success: bool,
    pub revert_reason: Option<String>,
}

impl From<Receipt> for Confirmation {
    fn from(r: Receipt) -> Self {
        Self {
            tx_hash: r.tx_hash,
            block_number: r.block_number,
            success: r.success,
            revert_reason: r.revert_reason,
        }
    }
}

impl Confirmation {
    pub fn signal(&self) -> ConfirmationSignal {
        ConfirmationSignal {
            tx_hash: self.tx_hash,
            success: self.success,
        }
    }
}

/// Broadcast by the watcher when a confirmation resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationSignal {
    pub tx_hash: B256,
    pub success: bool,
}

/// `(token, owner, operator)` triple a permission is read for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionKey {
    pub token: Address,
    pub owner: Address,
    pub operator: Address,
}

/// Final report of a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub path: SubmissionPath,
    pub confirmation: Confirmation,
    pub permission: PermissionState,
    /// Nonce the forward request was signed with; `None` on the direct path.
    pub batch_nonce: Option<U256>,
}
