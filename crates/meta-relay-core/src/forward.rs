use alloy::primitives::{Address, U256};
use tracing::debug;

use crate::domain::{CallPayload, ForwardRequest};
use crate::ports::{ClockPort, NoncePort, RelayError};

/// Everything a forward request needs except the nonce and the deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequestParams {
    pub from: Address,
    pub to: Address,
    pub token: Address,
    pub tx_gas: U256,
    pub token_gas_price: U256,
    pub batch_id: U256,
    pub deadline_offset_secs: u64,
    pub data: CallPayload,
}

/// Builds forward requests against the forwarder's authoritative nonce.
pub struct ForwardRequestBuilder<N, C>
where
    N: NoncePort,
    C: ClockPort,
{
    pub nonces: N,
    pub clock: C,
}

impl<N, C> ForwardRequestBuilder<N, C>
where
    N: NoncePort,
    C: ClockPort,
{
    pub fn new(nonces: N, clock: C) -> Self {
        Self { nonces, clock }
    }

    /// Fetch the nonce, stamp the deadline and assemble the request.
    ///
    /// The nonce is read fresh on every call and never derived locally.
    pub async fn build(&self, params: ForwardRequestParams) -> Result<ForwardRequest, RelayError> {
        if params.deadline_offset_secs == 0 {
            return Err(RelayError::Config(
                "deadline offset must be positive".to_owned(),
            ));
        }

        let batch_nonce = self
            .nonces
            .get_nonce(params.from, params.batch_id)
            .await
            .map_err(|e| match e {
                RelayError::NonceFetch(_) => e,
                other => RelayError::NonceFetch(other.to_string()),
            })?;

        let now = self.clock.now_secs()?;
        let deadline = now.checked_add(params.deadline_offset_secs).ok_or_else(|| {
            RelayError::Config("deadline offset overflows the clock".to_owned())
        })?;

        debug!(
            from = %params.from,
            batch_id = %params.batch_id,
            batch_nonce = %batch_nonce,
            deadline,
            "forward request built"
        );

        Ok(ForwardRequest {
            from: params.from,
            to: params.to,
            token: params.token,
            txGas: params.tx_gas,
            tokenGasPrice: params.token_gas_price,
            batchId: params.batch_id,
            batchNonce: batch_nonce,
            deadline: U256::from(deadline),
            data: params.data.into_bytes(),
        })
    }
}
