pub mod abi;
pub mod clock;
pub mod config;
pub mod hashing;
pub mod preflight;
pub mod relay;
pub mod rpc;
pub mod signer;
pub mod sim;

pub use abi::{encode_call, parse_call_args};
pub use clock::SystemClockAdapter;
pub use config::RelayConfig;
pub use hashing::{
    eip712_domain, personal_digest, typed_digest, HelperDigestAdapter, LocalDigestAdapter,
};
pub use preflight::{PreflightAdapter, TrustReport};
pub use relay::RelayServiceAdapter;
pub use rpc::{read_call, ContractReader, JsonRpcClient, RpcChainAdapter, RpcError};
pub use signer::{LocalSignerAdapter, WalletRpcSigner};
pub use sim::{Deployment, SimulatedChain};
