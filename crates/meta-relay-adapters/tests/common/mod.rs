#![allow(dead_code)]

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;

use alloy::primitives::{address, aliases::I96, Address, Bytes, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use serde_json::{json, Value};
use tiny_http::{Response, Server, StatusCode};

use meta_relay_adapters::{LocalDigestAdapter, LocalSignerAdapter, SimulatedChain};
use meta_relay_core::{
    ClockPort, ConfirmationWatcher, ForwardRequestBuilder, GasPolicy, Pipeline,
    PermissionOperation, RelayError, RelaySubmitter, SessionContext, SignatureService, SignerPort,
    TypedSigningPayload, PERMISSION_DELETE,
};

pub const TOKEN: Address = address!("00000000000000000000000000000000000000a1");
pub const OPERATOR: Address = address!("00000000000000000000000000000000000000b2");

pub type SimPipeline<C, G> = Pipeline<
    SimulatedChain,
    C,
    LocalDigestAdapter,
    G,
    SimulatedChain,
    SimulatedChain,
    SimulatedChain,
    SimulatedChain,
    SimulatedChain,
>;

pub type TestPipeline = SimPipeline<SimulatedChain, LocalSignerAdapter>;

/// Clock pinned to a fixed unix time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl ClockPort for FixedClock {
    fn now_secs(&self) -> Result<u64, RelayError> {
        Ok(self.0)
    }
}

/// Signs the raw digest for personal-sign requests, skipping the EIP-191 prefix.
#[derive(Debug, Clone)]
pub struct RawHashSigner(pub PrivateKeySigner);

impl SignerPort for RawHashSigner {
    fn address(&self) -> Address {
        self.0.address()
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Bytes, RelayError> {
        if message.len() != 32 {
            return Err(RelayError::SigningRejected("expected a 32-byte digest".to_owned()));
        }
        let sig = self
            .0
            .sign_hash(&B256::from_slice(message))
            .await
            .map_err(|e| RelayError::SigningRejected(e.to_string()))?;
        Ok(Bytes::from(sig.as_bytes().to_vec()))
    }

    async fn sign_typed_data(&self, payload: &TypedSigningPayload) -> Result<Bytes, RelayError> {
        let sig = self
            .0
            .sign_hash(&payload.signing_hash)
            .await
            .map_err(|e| RelayError::SigningRejected(e.to_string()))?;
        Ok(Bytes::from(sig.as_bytes().to_vec()))
    }
}

pub fn context(chain: &SimulatedChain) -> SessionContext {
    let d = chain.deployment();
    SessionContext {
        chain_id: d.chain_id,
        host: d.host,
        agreement: d.agreement,
        forwarder: d.forwarder,
        token: TOKEN,
        operator: OPERATOR,
        fee_token: Address::ZERO,
        gas: GasPolicy {
            tx_gas: U256::from(300_000u64),
            token_gas_price: U256::ZERO,
            batch_id: U256::ZERO,
            deadline_offset_secs: 600,
        },
        domain_name: d.domain_name,
        domain_version: d.domain_version,
        user_data: Bytes::new(),
        preflight_trusted_forwarder: true,
    }
}

pub fn pipeline_with<C, G>(
    chain: &SimulatedChain,
    ctx: SessionContext,
    clock: C,
    signer: G,
) -> SimPipeline<C, G>
where
    C: ClockPort,
    G: SignerPort,
{
    Pipeline::new(
        ctx,
        chain.clone(),
        clock,
        LocalDigestAdapter,
        signer,
        chain.clone(),
        chain.clone(),
        chain.clone(),
        chain.clone(),
        chain.clone(),
    )
}

pub fn new_pipeline(chain: &SimulatedChain) -> TestPipeline {
    new_pipeline_for(chain, PrivateKeySigner::random())
}

pub fn new_pipeline_for(chain: &SimulatedChain, key: PrivateKeySigner) -> TestPipeline {
    pipeline_with(
        chain,
        context(chain),
        chain.clone(),
        LocalSignerAdapter::new(key),
    )
}

/// Pipeline stages driven one at a time, outside any session.
pub struct Stages {
    pub owner: Address,
    pub builder: ForwardRequestBuilder<SimulatedChain, SimulatedChain>,
    pub signatures: SignatureService<LocalDigestAdapter, LocalSignerAdapter>,
    pub submitter: RelaySubmitter<SimulatedChain, SimulatedChain, SimulatedChain>,
    pub watcher: ConfirmationWatcher<SimulatedChain>,
}

pub fn stages_for(chain: &SimulatedChain, key: PrivateKeySigner) -> Stages {
    Stages {
        owner: key.address(),
        builder: ForwardRequestBuilder::new(chain.clone(), chain.clone()),
        signatures: SignatureService::new(LocalDigestAdapter, LocalSignerAdapter::new(key)),
        submitter: RelaySubmitter::new(chain.clone(), chain.clone(), chain.clone()),
        watcher: ConfirmationWatcher::new(chain.clone()),
    }
}

pub fn grant() -> PermissionOperation {
    PermissionOperation::Grant {
        level: PERMISSION_DELETE,
        allowance: I96::ZERO,
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Value,
    pub api_key: Option<String>,
}

impl RecordedRequest {
    pub fn rpc_method(&self) -> &str {
        self.body.get("method").and_then(Value::as_str).unwrap_or_default()
    }
}

pub fn rpc_result(result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": 1, "result": result })
}

pub fn rpc_error(code: i64, message: &str, data: Option<Value>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": { "code": code, "message": message, "data": data },
    })
}

/// Serve up to `max_requests` requests on a background thread.
pub fn spawn_mock_server<F>(
    max_requests: usize,
    handler: F,
) -> (String, Arc<Mutex<Vec<RecordedRequest>>>)
where
    F: Fn(&RecordedRequest) -> (u16, Value) + Send + 'static,
{
    let server = Server::http("127.0.0.1:0").expect("start server");
    let addr = format!("http://{}", server.server_addr());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&calls);

    thread::spawn(move || {
        for _ in 0..max_requests {
            let mut req = match server.recv() {
                Ok(r) => r,
                Err(_) => break,
            };
            let mut raw = String::new();
            let _ = req.as_reader().read_to_string(&mut raw);
            let api_key = req
                .headers()
                .iter()
                .find(|h| h.field.equiv("x-api-key"))
                .map(|h| h.value.as_str().to_owned());
            let entry = RecordedRequest {
                method: req.method().to_string(),
                path: req.url().to_owned(),
                body: serde_json::from_str(&raw).unwrap_or(Value::Null),
                api_key,
            };
            let (code, payload) = handler(&entry);
            if let Ok(mut g) = recorded.lock() {
                g.push(entry);
            }
            let response =
                Response::from_string(payload.to_string()).with_status_code(StatusCode(code));
            let _ = req.respond(response);
        }
    });

    (addr, calls)
}
