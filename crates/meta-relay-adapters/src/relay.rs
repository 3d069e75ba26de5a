use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use meta_relay_core::{RelayError, RelayPort, RelayedCall, SigningScheme};

use crate::rpc::JsonRpcClient;

const NATIVE_META_TX_PATH: &str = "/api/v2/meta-tx/native";
const SYSTEM_INFO_PATH: &str = "/api/v1/systemInfo";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NativeMetaTx<'a> {
    from: String,
    to: String,
    data: String,
    gas_limit: String,
    signature_type: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayResponse {
    tx_hash: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

/// Relay service that estimates, pays for and broadcasts forwarder calls.
#[derive(Debug, Clone)]
pub struct RelayServiceAdapter {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    rpc: JsonRpcClient,
}

impl RelayServiceAdapter {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        rpc: JsonRpcClient,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build relay client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            client,
            rpc,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    /// Fails unless the relay answers its system info endpoint.
    pub async fn check_ready(&self) -> Result<(), RelayError> {
        let url = format!("{}{SYSTEM_INFO_PATH}", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| RelayError::Transport(format!("relay unreachable: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Transport(format!(
                "relay not ready (status {status}): {body}"
            )));
        }
        info!(relay = %self.base_url, "relay ready");
        Ok(())
    }

    /// Gas for `call`. Reverts naming an untrusted forwarder are fatal; any
    /// other estimation failure falls back to the signed gas limit and the
    /// call is left to fail on-chain.
    async fn estimate_gas(&self, call: &RelayedCall) -> Result<U256, RelayError> {
        let tx = json!({
            "from": call.signer.to_string(),
            "to": call.forwarder.to_string(),
            "data": call.data.to_string(),
        });
        match self.rpc.request("eth_estimateGas", json!([tx])).await {
            Ok(Value::String(raw)) => U256::from_str(&raw)
                .map_err(|e| RelayError::Transport(format!("invalid gas estimate '{raw}': {e}"))),
            Ok(other) => Err(RelayError::Transport(format!(
                "eth_estimateGas returned {other}"
            ))),
            Err(e) => {
                let reason = e.revert_reason().unwrap_or_else(|| e.to_string());
                if mentions_untrusted_forwarder(&reason) {
                    return Err(RelayError::UntrustedForwarder(reason));
                }
                warn!(%reason, "gas estimation failed");
                Err(RelayError::Submission(reason))
            }
        }
    }
}

impl RelayPort for RelayServiceAdapter {
    async fn relay(&self, call: &RelayedCall) -> Result<B256, RelayError> {
        let gas = self.estimate_gas(call).await?;
        let body = NativeMetaTx {
            from: call.signer.to_string(),
            to: call.forwarder.to_string(),
            data: call.data.to_string(),
            gas_limit: format!("0x{gas:x}"),
            signature_type: match call.scheme {
                SigningScheme::PersonalSign => "PERSONAL_SIGN",
                SigningScheme::TypedData => "EIP712_SIGN",
            },
        };
        let url = format!("{}{NATIVE_META_TX_PATH}", self.base_url);
        debug!(%url, from = %call.signer, gas = %gas, "relay request");

        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Transport(format!("relay request failed: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RelayError::Transport(format!("relay response read failed: {e}")))?;
        let parsed: Option<RelayResponse> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let detail = parsed
                .and_then(|r| r.error.or(r.message))
                .unwrap_or(text);
            if mentions_untrusted_forwarder(&detail) {
                return Err(RelayError::UntrustedForwarder(detail));
            }
            return Err(RelayError::Submission(format!("relay status {status}: {detail}")));
        }

        let hash = parsed
            .and_then(|r| r.tx_hash)
            .ok_or_else(|| RelayError::Submission(format!("relay response without txHash: {text}")))?;
        B256::from_str(&hash).map_err(|e| RelayError::Submission(format!("invalid relay tx hash: {e}")))
    }
}

pub fn mentions_untrusted_forwarder(reason: &str) -> bool {
    let lower = reason.to_ascii_lowercase();
    lower.contains("not trusted forwarder")
        || lower.contains("untrusted forwarder")
        || lower.contains("not a trusted forwarder")
}
