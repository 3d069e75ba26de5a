use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use alloy::sol_types::{decode_revert_reason, SolCall};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use meta_relay_core::contracts::{IFlowAgreement, IForwarder, IForwarderRecipient};
use meta_relay_core::{
    NoncePort, PermissionKey, PermissionReadPort, PermissionState, ProviderPort, Receipt,
    ReceiptPort, RelayError, TrustPort,
};

/// Wallet-side "user rejected the request".
pub const USER_REJECTED_CODE: i64 = 4001;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

impl RpcError {
    /// Raw revert payload carried in the JSON-RPC error `data` field.
    pub fn revert_data(&self) -> Option<Bytes> {
        let RpcError::Rpc { data: Some(data), .. } = self else {
            return None;
        };
        let raw = match data {
            Value::String(s) => s.as_str(),
            Value::Object(o) => o.get("data").and_then(Value::as_str)?,
            _ => return None,
        };
        Bytes::from_str(raw).ok()
    }

    /// Decoded revert reason, falling back to the node's error message.
    pub fn revert_reason(&self) -> Option<String> {
        if let Some(reason) = self.revert_data().and_then(|d| decode_revert_reason(&d)) {
            return Some(reason);
        }
        match self {
            RpcError::Rpc { message, .. } => Some(message.clone()),
            _ => None,
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, RpcError::Rpc { code, .. } if *code == USER_REJECTED_CODE)
    }
}

impl From<RpcError> for RelayError {
    fn from(e: RpcError) -> Self {
        if e.is_user_rejection() {
            return RelayError::SigningRejected(e.to_string());
        }
        RelayError::Transport(e.to_string())
    }
}

/// Minimal async JSON-RPC 2.0 client.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    url: String,
    client: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "rpc request");
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(RpcError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| RpcError::Malformed(format!("json decode failed: {e}")))?;
        if let Some(err) = body.get("error") {
            return Err(RpcError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_owned(),
                data: err.get("data").cloned(),
            });
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| RpcError::Malformed("missing result".to_owned()))
    }

    pub async fn eth_call(&self, to: Address, data: &Bytes) -> Result<Bytes, RpcError> {
        let result = self
            .request(
                "eth_call",
                json!([{ "to": to.to_string(), "data": data.to_string() }, "latest"]),
            )
            .await?;
        parse_hex_field(&result)
    }
}

/// Read-only contract access, by raw calldata.
#[allow(async_fn_in_trait)]
pub trait ContractReader {
    async fn read(&self, to: Address, data: Bytes) -> Result<Bytes, RelayError>;
}

impl ContractReader for JsonRpcClient {
    async fn read(&self, to: Address, data: Bytes) -> Result<Bytes, RelayError> {
        self.eth_call(to, &data).await.map_err(RelayError::from)
    }
}

/// Encode `call`, read it from `to`, decode the return values.
pub async fn read_call<R, C>(reader: &R, to: Address, call: &C) -> Result<C::Return, RelayError>
where
    R: ContractReader,
    C: SolCall,
{
    let raw = reader.read(to, Bytes::from(call.abi_encode())).await?;
    C::abi_decode_returns(&raw, true)
        .map_err(|e| RelayError::Encoding(format!("{} returned undecodable data: {e}", C::SIGNATURE)))
}

/// Chain access over JSON-RPC: nonces, permission reads, trust checks,
/// direct transactions and receipt polling.
#[derive(Debug, Clone)]
pub struct RpcChainAdapter {
    pub rpc: JsonRpcClient,
    forwarder: Address,
    poll_interval: Duration,
}

impl RpcChainAdapter {
    pub fn new(rpc: JsonRpcClient, forwarder: Address, poll_interval: Duration) -> Self {
        Self {
            rpc,
            forwarder,
            poll_interval,
        }
    }

    /// Replay a failed transaction at its block to recover the revert reason.
    async fn replay_revert_reason(&self, tx_hash: B256, block: &Value) -> Option<String> {
        let tx = self
            .rpc
            .request("eth_getTransactionByHash", json!([tx_hash.to_string()]))
            .await
            .ok()?;
        let (from, to, input) = (tx.get("from")?, tx.get("to")?, tx.get("input")?);
        let call = json!({ "from": from, "to": to, "data": input });
        match self.rpc.request("eth_call", json!([call, block])).await {
            Err(e) => e.revert_reason(),
            Ok(_) => None,
        }
    }
}

impl NoncePort for RpcChainAdapter {
    async fn get_nonce(&self, from: Address, batch_id: U256) -> Result<U256, RelayError> {
        let call = IForwarder::getNonceCall {
            from,
            batchId: batch_id,
        };
        read_call(&self.rpc, self.forwarder, &call)
            .await
            .map(|r| r.nonce)
            .map_err(|e| RelayError::NonceFetch(e.to_string()))
    }
}

impl PermissionReadPort for RpcChainAdapter {
    async fn read_operator_permission(
        &self,
        agreement: Address,
        key: PermissionKey,
    ) -> Result<PermissionState, RelayError> {
        let call = IFlowAgreement::getFlowOperatorDataCall {
            token: key.token,
            sender: key.owner,
            flowOperator: key.operator,
        };
        let data = read_call(&self.rpc, agreement, &call).await?;
        Ok(PermissionState(data.permissions))
    }
}

impl TrustPort for RpcChainAdapter {
    async fn is_trusted_forwarder(
        &self,
        target: Address,
        forwarder: Address,
    ) -> Result<bool, RelayError> {
        let call = IForwarderRecipient::isTrustedForwarderCall { forwarder };
        read_call(&self.rpc, target, &call).await.map(|r| r.trusted)
    }
}

impl ProviderPort for RpcChainAdapter {
    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: &Bytes,
    ) -> Result<B256, RelayError> {
        let tx = json!({
            "from": from.to_string(),
            "to": to.to_string(),
            "data": data.to_string(),
        });
        let result = self
            .rpc
            .request("eth_sendTransaction", json!([tx]))
            .await
            .map_err(|e| match e {
                e if e.is_user_rejection() => RelayError::SigningRejected(e.to_string()),
                RpcError::Rpc { message, .. } => RelayError::Submission(message),
                other => RelayError::Transport(other.to_string()),
            })?;
        let hash = result
            .as_str()
            .ok_or_else(|| RelayError::Transport("eth_sendTransaction must return tx hash".to_owned()))?;
        B256::from_str(hash).map_err(|e| RelayError::Transport(format!("invalid tx hash: {e}")))
    }
}

impl ReceiptPort for RpcChainAdapter {
    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<Receipt, RelayError> {
        loop {
            let result = self
                .rpc
                .request("eth_getTransactionReceipt", json!([tx_hash.to_string()]))
                .await?;
            if result.is_null() {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            let block = result.get("blockNumber").cloned().unwrap_or(Value::Null);
            let block_number = parse_quantity(&block)?;
            let success = parse_quantity(result.get("status").unwrap_or(&Value::Null))? == 1;
            let revert_reason = if success {
                None
            } else {
                let reason = self.replay_revert_reason(tx_hash, &block).await;
                if reason.is_none() {
                    warn!(%tx_hash, "transaction reverted without a recoverable reason");
                }
                reason
            };
            return Ok(Receipt {
                tx_hash,
                block_number,
                success,
                revert_reason,
            });
        }
    }
}

fn parse_hex_field(value: &Value) -> Result<Bytes, RpcError> {
    let raw = value
        .as_str()
        .ok_or_else(|| RpcError::Malformed("expected hex string".to_owned()))?;
    Bytes::from_str(raw).map_err(|e| RpcError::Malformed(format!("invalid hex: {e}")))
}

fn parse_quantity(value: &Value) -> Result<u64, RelayError> {
    let raw = value
        .as_str()
        .ok_or_else(|| RelayError::Transport(format!("expected hex quantity, got {value}")))?;
    U64::from_str(raw)
        .map(|q| q.to::<u64>())
        .map_err(|e| RelayError::Transport(format!("invalid quantity '{raw}': {e}")))
}
