//! In-process chain with a host, a flow agreement, a forwarder and a digest
//! helper.
//!
//! Forwarder calls are verified from scratch: the chain re-derives both
//! digests with its own encoding, recovers the signer and checks nonce,
//! deadline and trust before executing the call with the ERC-2771 sender
//! suffix. Every port of the pipeline is implemented, so one cloned handle
//! can back a whole session.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::{
    eip191_hash_message, keccak256, Address, Bytes, PrimitiveSignature, B256, U256,
};
use alloy::sol_types::{Eip712Domain, SolCall, SolInterface, SolStruct, SolValue};
use tokio::sync::Notify;
use tracing::debug;

use meta_relay_core::contracts::{
    IDigestHelper, IFlowAgreement, IForwarder, IForwarderRecipient, IHost,
};
use meta_relay_core::{
    ClockPort, ForwardRequest, NoncePort, PermissionKey, PermissionReadPort, PermissionState,
    ProviderPort, Receipt, ReceiptPort, RelayError, RelayPort, RelayedCall, TrustPort,
    OPERATION_TYPE_CALL_AGREEMENT, PERMISSION_FULL,
};

use crate::rpc::ContractReader;

/// Addresses and EIP-712 domain of the simulated deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub chain_id: u64,
    pub host: Address,
    pub agreement: Address,
    pub forwarder: Address,
    pub helper: Address,
    pub domain_name: String,
    pub domain_version: String,
    pub recipient_version: String,
}

impl Default for Deployment {
    fn default() -> Self {
        Self {
            chain_id: 31_337,
            host: Address::with_last_byte(0x10),
            agreement: Address::with_last_byte(0x20),
            forwarder: Address::with_last_byte(0x30),
            helper: Address::with_last_byte(0x40),
            domain_name: "Biconomy Forwarder".to_owned(),
            domain_version: "1".to_owned(),
            recipient_version: "1".to_owned(),
        }
    }
}

#[derive(Debug)]
struct ChainState {
    deployment: Deployment,
    timestamp: u64,
    block: u64,
    tx_count: u64,
    nonces: HashMap<(Address, U256), U256>,
    permissions: HashMap<PermissionKey, u8>,
    trusted: HashSet<(Address, Address)>,
    receipts: HashMap<B256, Receipt>,
    hold_receipts: bool,
    held: HashSet<B256>,
    fail_next_submission: Option<String>,
    fail_next_nonce: Option<String>,
}

type Exec<T> = Result<T, String>;

#[derive(Debug, Clone)]
pub struct SimulatedChain {
    state: Arc<Mutex<ChainState>>,
    released: Arc<Notify>,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new(Deployment::default())
    }
}

impl SimulatedChain {
    /// The host trusts the forwarder from genesis.
    pub fn new(deployment: Deployment) -> Self {
        let mut trusted = HashSet::new();
        trusted.insert((deployment.host, deployment.forwarder));
        Self {
            state: Arc::new(Mutex::new(ChainState {
                deployment,
                timestamp: 1_700_000_000,
                block: 1,
                tx_count: 0,
                nonces: HashMap::new(),
                permissions: HashMap::new(),
                trusted,
                receipts: HashMap::new(),
                hold_receipts: false,
                held: HashSet::new(),
                fail_next_submission: None,
                fail_next_nonce: None,
            })),
            released: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChainState>, RelayError> {
        self.state
            .lock()
            .map_err(|e| RelayError::Transport(format!("simulated chain lock poisoned: {e}")))
    }

    pub fn deployment(&self) -> Deployment {
        self.lock().map(|g| g.deployment.clone()).unwrap_or_default()
    }

    pub fn timestamp(&self) -> u64 {
        self.lock().map(|g| g.timestamp).unwrap_or_default()
    }

    pub fn advance_time(&self, secs: u64) {
        if let Ok(mut g) = self.lock() {
            g.timestamp = g.timestamp.saturating_add(secs);
        }
    }

    pub fn set_trusted(&self, target: Address, forwarder: Address, trusted: bool) {
        if let Ok(mut g) = self.lock() {
            if trusted {
                g.trusted.insert((target, forwarder));
            } else {
                g.trusted.remove(&(target, forwarder));
            }
        }
    }

    pub fn nonce_of(&self, from: Address, batch_id: U256) -> U256 {
        self.lock()
            .ok()
            .and_then(|g| g.nonces.get(&(from, batch_id)).copied())
            .unwrap_or_default()
    }

    pub fn permission_of(&self, token: Address, owner: Address, operator: Address) -> u8 {
        let key = PermissionKey {
            token,
            owner,
            operator,
        };
        self.lock()
            .ok()
            .and_then(|g| g.permissions.get(&key).copied())
            .unwrap_or_default()
    }

    pub fn receipt(&self, tx_hash: B256) -> Option<Receipt> {
        self.lock().ok().and_then(|g| g.receipts.get(&tx_hash).cloned())
    }

    pub fn transaction_count(&self) -> u64 {
        self.lock().map(|g| g.tx_count).unwrap_or_default()
    }

    /// While holding, newly mined receipts stay invisible to watchers.
    pub fn hold_receipts(&self, hold: bool) {
        if let Ok(mut g) = self.lock() {
            g.hold_receipts = hold;
        }
        if !hold {
            self.release_receipts();
        }
    }

    pub fn release_receipts(&self) {
        if let Ok(mut g) = self.lock() {
            g.held.clear();
        }
        self.released.notify_waiters();
    }

    pub fn fail_next_submission(&self, reason: impl Into<String>) {
        if let Ok(mut g) = self.lock() {
            g.fail_next_submission = Some(reason.into());
        }
    }

    pub fn fail_next_nonce(&self, reason: impl Into<String>) {
        if let Ok(mut g) = self.lock() {
            g.fail_next_nonce = Some(reason.into());
        }
    }

    /// Domain separator the forwarder registered.
    pub fn domain_separator(&self) -> B256 {
        self.lock()
            .map(|g| domain_of(&g.deployment).separator())
            .unwrap_or_default()
    }
}

fn domain_of(d: &Deployment) -> Eip712Domain {
    Eip712Domain {
        name: Some(d.domain_name.clone().into()),
        version: Some(d.domain_version.clone().into()),
        chain_id: Some(U256::from(d.chain_id)),
        verifying_contract: Some(d.forwarder),
        salt: None,
    }
}

fn packed_request_hash(req: &ForwardRequest) -> B256 {
    let packed = (
        req.from,
        req.to,
        req.token,
        req.txGas,
        req.tokenGasPrice,
        req.batchId,
        req.batchNonce,
        req.deadline,
        keccak256(&req.data),
    )
        .abi_encode_packed();
    keccak256(packed)
}

fn recover(hash: B256, sig: &Bytes) -> Exec<Address> {
    PrimitiveSignature::from_raw(sig.as_ref())
        .and_then(|s| s.recover_address_from_prehash(&hash))
        .map_err(|e| format!("invalid signature: {e}"))
}

impl ChainState {
    fn mine(&mut self, outcome: Exec<()>) -> B256 {
        self.tx_count += 1;
        self.block += 1;
        let tx_hash = keccak256((U256::from(self.tx_count), U256::from(self.block)).abi_encode());
        let (success, revert_reason) = match outcome {
            Ok(()) => (true, None),
            Err(reason) => (false, Some(reason)),
        };
        debug!(%tx_hash, block = self.block, success, ?revert_reason, "simulated block");
        self.receipts.insert(
            tx_hash,
            Receipt {
                tx_hash,
                block_number: self.block,
                success,
                revert_reason,
            },
        );
        if self.hold_receipts {
            self.held.insert(tx_hash);
        }
        tx_hash
    }

    fn is_trusted(&self, target: Address, forwarder: Address) -> bool {
        self.trusted.contains(&(target, forwarder))
    }

    /// Forwarder entry point: verify, then call `req.to` on behalf of `req.from`.
    fn execute_forwarder(&mut self, calldata: &[u8]) -> Exec<()> {
        let forwarder = self.deployment.forwarder;
        let (req, signer) = match IForwarder::IForwarderCalls::abi_decode(calldata, true)
            .map_err(|e| format!("forwarder: undecodable call: {e}"))?
        {
            IForwarder::IForwarderCalls::executePersonalSign(call) => {
                let hash = eip191_hash_message(packed_request_hash(&call.req));
                let signer = recover(hash, &call.sig)?;
                (call.req, signer)
            }
            IForwarder::IForwarderCalls::executeEIP712(call) => {
                let domain = domain_of(&self.deployment);
                if call.domainSeparator != domain.separator() {
                    return Err("forwarder: unregistered domain separator".to_owned());
                }
                let hash = call.req.eip712_signing_hash(&domain);
                let signer = recover(hash, &call.sig)?;
                (call.req, signer)
            }
            IForwarder::IForwarderCalls::getNonce(_) => {
                return Err("forwarder: getNonce is a view".to_owned());
            }
        };
        if signer != req.from {
            return Err("forwarder: signature does not match request".to_owned());
        }

        let key = (req.from, req.batchId);
        let expected = self.nonces.get(&key).copied().unwrap_or_default();
        if req.batchNonce != expected {
            return Err(format!(
                "forwarder: nonce mismatch (expected {expected}, got {})",
                req.batchNonce
            ));
        }
        if req.deadline <= U256::from(self.timestamp) {
            return Err("forwarder: request expired".to_owned());
        }

        let mut forwarded = req.data.to_vec();
        forwarded.extend_from_slice(req.from.as_slice());
        self.call_target(forwarder, req.to, &forwarded)
            .map_err(|reason| format!("forwarder: call failed: {reason}"))?;

        self.nonces.insert(key, expected + U256::from(1));
        Ok(())
    }

    fn call_target(&mut self, caller: Address, target: Address, calldata: &[u8]) -> Exec<()> {
        if target == self.deployment.host {
            self.execute_host(caller, calldata)
        } else if target == self.deployment.forwarder {
            self.execute_forwarder(calldata)
        } else if target == self.deployment.agreement {
            Err("agreement: must be called through the host".to_owned())
        } else {
            Ok(())
        }
    }

    fn execute_host(&mut self, caller: Address, calldata: &[u8]) -> Exec<()> {
        let via_forwarder = self.is_trusted(self.deployment.host, caller);
        let (sender, calldata) = if via_forwarder {
            if calldata.len() < 20 {
                return Err("host: missing forwarded sender".to_owned());
            }
            let split = calldata.len() - 20;
            (Address::from_slice(&calldata[split..]), &calldata[..split])
        } else {
            (caller, calldata)
        };

        match IHost::IHostCalls::abi_decode(calldata, true)
            .map_err(|e| format!("host: undecodable call: {e}"))?
        {
            IHost::IHostCalls::callAgreement(call) => {
                if call.agreementClass != self.deployment.agreement {
                    return Err("host: unknown agreement".to_owned());
                }
                self.apply_agreement(sender, &call.callData)
            }
            IHost::IHostCalls::forwardBatchCall(call) => {
                if !via_forwarder {
                    return Err("host: not trusted forwarder".to_owned());
                }
                for op in &call.operations {
                    if op.operationType != OPERATION_TYPE_CALL_AGREEMENT {
                        return Err(format!(
                            "host: unsupported operation type {}",
                            op.operationType
                        ));
                    }
                    if op.target != self.deployment.agreement {
                        return Err("host: unknown agreement".to_owned());
                    }
                    let (call_data, _user_data) = <(Bytes, Bytes)>::abi_decode_params(&op.data, true)
                        .map_err(|e| format!("host: undecodable operation data: {e}"))?;
                    self.apply_agreement(sender, &call_data)?;
                }
                Ok(())
            }
        }
    }

    fn apply_agreement(&mut self, sender: Address, calldata: &[u8]) -> Exec<()> {
        match IFlowAgreement::IFlowAgreementCalls::abi_decode(calldata, true)
            .map_err(|e| format!("agreement: undecodable call: {e}"))?
        {
            IFlowAgreement::IFlowAgreementCalls::updateFlowOperatorPermissions(call) => {
                if call.flowOperator == sender {
                    return Err("agreement: operator is the sender".to_owned());
                }
                if call.permissions & !PERMISSION_FULL != 0 {
                    return Err("agreement: unclean permissions".to_owned());
                }
                if call.flowRateAllowance.is_negative() {
                    return Err("agreement: negative flow rate allowance".to_owned());
                }
                let key = PermissionKey {
                    token: call.token,
                    owner: sender,
                    operator: call.flowOperator,
                };
                self.permissions.insert(key, call.permissions);
                Ok(())
            }
            IFlowAgreement::IFlowAgreementCalls::revokeFlowOperatorWithFullControl(call) => {
                if call.flowOperator == sender {
                    return Err("agreement: operator is the sender".to_owned());
                }
                let key = PermissionKey {
                    token: call.token,
                    owner: sender,
                    operator: call.flowOperator,
                };
                self.permissions.insert(key, 0);
                Ok(())
            }
            IFlowAgreement::IFlowAgreementCalls::getFlowOperatorData(_) => {
                Err("agreement: getFlowOperatorData is a view".to_owned())
            }
        }
    }

    fn view(&self, to: Address, data: &[u8]) -> Exec<Bytes> {
        let selector: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| "calldata shorter than a selector".to_owned())?;
        let d = &self.deployment;
        let undecodable = |e: alloy::sol_types::Error| format!("undecodable view call: {e}");

        let encoded = if selector == IForwarder::getNonceCall::SELECTOR && to == d.forwarder {
            let call = IForwarder::getNonceCall::abi_decode(data, true).map_err(undecodable)?;
            let nonce = self
                .nonces
                .get(&(call.from, call.batchId))
                .copied()
                .unwrap_or_default();
            IForwarder::getNonceCall::abi_encode_returns(&(nonce,))
        } else if selector == IDigestHelper::computeDigestCall::SELECTOR && to == d.helper {
            let call = IDigestHelper::computeDigestCall::abi_decode(data, true).map_err(undecodable)?;
            IDigestHelper::computeDigestCall::abi_encode_returns(&(packed_request_hash(&call.req),))
        } else if selector == IFlowAgreement::getFlowOperatorDataCall::SELECTOR && to == d.agreement
        {
            let call =
                IFlowAgreement::getFlowOperatorDataCall::abi_decode(data, true).map_err(undecodable)?;
            let key = PermissionKey {
                token: call.token,
                owner: call.sender,
                operator: call.flowOperator,
            };
            let permissions = self.permissions.get(&key).copied().unwrap_or_default();
            let id = keccak256((call.token, call.sender, call.flowOperator).abi_encode_packed());
            IFlowAgreement::getFlowOperatorDataCall::abi_encode_returns(&(
                id,
                permissions,
                alloy::primitives::aliases::I96::default(),
            ))
        } else if selector == IForwarderRecipient::isTrustedForwarderCall::SELECTOR {
            let call = IForwarderRecipient::isTrustedForwarderCall::abi_decode(data, true)
                .map_err(undecodable)?;
            IForwarderRecipient::isTrustedForwarderCall::abi_encode_returns(&(
                self.is_trusted(to, call.forwarder),
            ))
        } else if selector == IForwarderRecipient::trustedForwarderCall::SELECTOR {
            let registered = self
                .trusted
                .iter()
                .find(|(target, _)| *target == to)
                .map(|(_, forwarder)| *forwarder)
                .ok_or_else(|| "no trusted forwarder registered".to_owned())?;
            IForwarderRecipient::trustedForwarderCall::abi_encode_returns(&(registered,))
        } else if selector == IForwarderRecipient::versionRecipientCall::SELECTOR && to == d.host {
            IForwarderRecipient::versionRecipientCall::abi_encode_returns(&(
                d.recipient_version.clone(),
            ))
        } else {
            return Err(format!("no view {} on {to}", Bytes::copy_from_slice(&selector)));
        };
        Ok(Bytes::from(encoded))
    }
}

impl ClockPort for SimulatedChain {
    fn now_secs(&self) -> Result<u64, RelayError> {
        Ok(self.lock()?.timestamp)
    }
}

impl NoncePort for SimulatedChain {
    async fn get_nonce(&self, from: Address, batch_id: U256) -> Result<U256, RelayError> {
        let mut g = self.lock()?;
        if let Some(reason) = g.fail_next_nonce.take() {
            return Err(RelayError::NonceFetch(reason));
        }
        Ok(g.nonces.get(&(from, batch_id)).copied().unwrap_or_default())
    }
}

impl PermissionReadPort for SimulatedChain {
    async fn read_operator_permission(
        &self,
        agreement: Address,
        key: PermissionKey,
    ) -> Result<PermissionState, RelayError> {
        let g = self.lock()?;
        if agreement != g.deployment.agreement {
            return Err(RelayError::Transport(format!("no agreement at {agreement}")));
        }
        Ok(PermissionState(g.permissions.get(&key).copied().unwrap_or_default()))
    }
}

impl TrustPort for SimulatedChain {
    async fn is_trusted_forwarder(
        &self,
        target: Address,
        forwarder: Address,
    ) -> Result<bool, RelayError> {
        Ok(self.lock()?.is_trusted(target, forwarder))
    }
}

impl ProviderPort for SimulatedChain {
    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: &Bytes,
    ) -> Result<B256, RelayError> {
        let mut g = self.lock()?;
        if let Some(reason) = g.fail_next_submission.take() {
            return Err(RelayError::Submission(reason));
        }
        let outcome = g.call_target(from, to, data);
        Ok(g.mine(outcome))
    }
}

impl RelayPort for SimulatedChain {
    async fn relay(&self, call: &RelayedCall) -> Result<B256, RelayError> {
        let mut g = self.lock()?;
        if let Some(reason) = g.fail_next_submission.take() {
            return Err(RelayError::Submission(reason));
        }
        if call.forwarder != g.deployment.forwarder {
            return Err(RelayError::Submission(format!(
                "no forwarder deployed at {}",
                call.forwarder
            )));
        }

        // Gas estimation surfaces an untrusted target before anything is mined.
        let target = match IForwarder::IForwarderCalls::abi_decode(&call.data, true) {
            Ok(IForwarder::IForwarderCalls::executePersonalSign(c)) => c.req.to,
            Ok(IForwarder::IForwarderCalls::executeEIP712(c)) => c.req.to,
            _ => {
                return Err(RelayError::Submission(
                    "relay only forwards execute calls".to_owned(),
                ))
            }
        };
        if !g.is_trusted(target, call.forwarder) {
            return Err(RelayError::UntrustedForwarder(format!(
                "{target}: not trusted forwarder"
            )));
        }

        let outcome = g.execute_forwarder(&call.data);
        Ok(g.mine(outcome))
    }
}

impl ReceiptPort for SimulatedChain {
    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<Receipt, RelayError> {
        loop {
            let released = self.released.notified();
            {
                let g = self.lock()?;
                if !g.held.contains(&tx_hash) {
                    return g
                        .receipts
                        .get(&tx_hash)
                        .cloned()
                        .ok_or_else(|| RelayError::Transport(format!("unknown transaction {tx_hash}")));
                }
            }
            released.await;
        }
    }
}

impl ContractReader for SimulatedChain {
    async fn read(&self, to: Address, data: Bytes) -> Result<Bytes, RelayError> {
        self.lock()?
            .view(to, &data)
            .map_err(|reason| RelayError::ExecutionRevert(format!("eth_call reverted: {reason}")))
    }
}
