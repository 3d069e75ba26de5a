use alloy::primitives::Address;
use tracing::{debug, info};

use crate::domain::{CallPayload, ForwardRequest, SignedAuthorization, TransactionHandle};
use crate::encoder::CallEncoder;
use crate::ports::{ProviderPort, RelayError, RelayPort, RelayedCall, TrustPort};

/// Dispatches a call either as a plain transaction or through the relay.
///
/// Exclusivity is enforced one level up, by the pipeline session that owns
/// the submitter.
pub struct RelaySubmitter<P, R, T>
where
    P: ProviderPort,
    R: RelayPort,
    T: TrustPort,
{
    pub provider: P,
    pub relay: R,
    pub trust: T,
    encoder: CallEncoder,
}

impl<P, R, T> RelaySubmitter<P, R, T>
where
    P: ProviderPort,
    R: RelayPort,
    T: TrustPort,
{
    pub fn new(provider: P, relay: R, trust: T) -> Self {
        Self {
            provider,
            relay,
            trust,
            encoder: CallEncoder,
        }
    }

    /// Caller pays gas.
    pub async fn submit_direct(
        &self,
        payload: &CallPayload,
        from: Address,
        to: Address,
    ) -> Result<TransactionHandle, RelayError> {
        let hash = self
            .provider
            .send_transaction(from, to, payload.as_bytes())
            .await?;
        info!(%from, %to, tx_hash = %hash, "direct transaction broadcast");
        Ok(TransactionHandle::new(hash))
    }

    /// Relay pays gas; the forwarder verifies `auth` before calling `request.to`.
    pub async fn submit_via_relay(
        &self,
        request: &ForwardRequest,
        auth: &SignedAuthorization,
        forwarder: Address,
        preflight: bool,
    ) -> Result<TransactionHandle, RelayError> {
        if preflight {
            let trusted = self.trust.is_trusted_forwarder(request.to, forwarder).await?;
            debug!(target_contract = %request.to, %forwarder, trusted, "trusted forwarder preflight");
            if !trusted {
                return Err(RelayError::UntrustedForwarder(format!(
                    "{} does not trust forwarder {forwarder}",
                    request.to
                )));
            }
        }

        let data = self.encoder.encode_forwarder_call(request, auth)?;
        let call = RelayedCall {
            signer: request.from,
            forwarder,
            scheme: auth.scheme,
            data: data.into_bytes(),
            gas_limit: request.txGas,
        };
        let hash = self.relay.relay(&call).await?;
        info!(
            from = %request.from,
            %forwarder,
            batch_nonce = %request.batchNonce,
            tx_hash = %hash,
            "meta-transaction relayed"
        );
        Ok(TransactionHandle::new(hash))
    }
}
