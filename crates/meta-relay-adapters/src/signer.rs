use std::str::FromStr;

use alloy::primitives::{Address, Bytes};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use serde_json::json;

use meta_relay_core::{RelayError, SignerPort, TypedSigningPayload};

use crate::rpc::JsonRpcClient;

/// Signs with a key held in-process.
#[derive(Debug, Clone)]
pub struct LocalSignerAdapter {
    signer: PrivateKeySigner,
}

impl LocalSignerAdapter {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    pub fn from_hex(private_key: &str) -> Result<Self, RelayError> {
        let signer = PrivateKeySigner::from_str(private_key.trim())
            .map_err(|e| RelayError::Config(format!("invalid private key: {e}")))?;
        Ok(Self::new(signer))
    }
}

impl SignerPort for LocalSignerAdapter {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Bytes, RelayError> {
        let signature = self
            .signer
            .sign_message(message)
            .await
            .map_err(|e| RelayError::SigningRejected(format!("local signer failed: {e}")))?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }

    async fn sign_typed_data(&self, payload: &TypedSigningPayload) -> Result<Bytes, RelayError> {
        let signature = self
            .signer
            .sign_hash(&payload.signing_hash)
            .await
            .map_err(|e| RelayError::SigningRejected(format!("local signer failed: {e}")))?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }
}

/// Delegates signing to a wallet behind JSON-RPC (`personal_sign`,
/// `eth_signTypedData_v4`).
#[derive(Debug, Clone)]
pub struct WalletRpcSigner {
    rpc: JsonRpcClient,
    account: Address,
}

impl WalletRpcSigner {
    pub fn new(rpc: JsonRpcClient, account: Address) -> Self {
        Self { rpc, account }
    }

    async fn request_signature(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Bytes, RelayError> {
        let result = self.rpc.request(method, params).await?;
        let raw = result.as_str().ok_or_else(|| {
            RelayError::Transport(format!("{method} response must be a hex string"))
        })?;
        Bytes::from_str(raw).map_err(|e| RelayError::Transport(format!("invalid signature hex: {e}")))
    }
}

impl SignerPort for WalletRpcSigner {
    fn address(&self) -> Address {
        self.account
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Bytes, RelayError> {
        let params = json!([Bytes::copy_from_slice(message).to_string(), self.account.to_string()]);
        self.request_signature("personal_sign", params).await
    }

    async fn sign_typed_data(&self, payload: &TypedSigningPayload) -> Result<Bytes, RelayError> {
        let document = serde_json::to_string(&payload.typed_data)
            .map_err(|e| RelayError::Encoding(format!("typed data serialize failed: {e}")))?;
        let params = json!([self.account.to_string(), document]);
        self.request_signature("eth_signTypedData_v4", params).await
    }
}
