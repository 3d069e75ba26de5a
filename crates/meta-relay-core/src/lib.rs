pub mod contracts;
pub mod domain;
pub mod encoder;
pub mod forward;
pub mod permission;
pub mod pipeline;
pub mod ports;
pub mod signature;
pub mod state_machine;
pub mod submitter;
pub mod watcher;

pub use contracts::{
    ERC20ForwardRequest, Operation, OPERATION_TYPE_CALL_AGREEMENT, PERMISSION_CREATE,
    PERMISSION_DELETE, PERMISSION_FULL, PERMISSION_UPDATE,
};
pub use domain::{
    BatchEnvelope, CallPayload, Confirmation, ConfirmationSignal, ForwardRequest,
    ForwarderDomain, GasPolicy, PermissionKey, PermissionOperation, PermissionState, Receipt,
    SessionContext, SignedAuthorization, SigningScheme, SubmissionOutcome, SubmissionPath,
    TransactionHandle, TypedSigningPayload,
};
pub use encoder::CallEncoder;
pub use forward::{ForwardRequestBuilder, ForwardRequestParams};
pub use permission::{PermissionSnapshot, PermissionStateSync};
pub use pipeline::{Pipeline, Session};
pub use ports::{
    ClockPort, DigestParts, DigestPort, ErrorKind, NoncePort, PermissionReadPort, ProviderPort,
    ReceiptPort, RelayError, RelayPort, RelayedCall, SignerPort, TrustPort,
};
pub use signature::{recover_signer, signed_hash, typed_data_document, SignatureService};
pub use state_machine::{
    submission_transition, StateTransition, SubmissionAction, SubmissionState,
};
pub use submitter::RelaySubmitter;
pub use watcher::ConfirmationWatcher;
