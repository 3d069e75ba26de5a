use alloy::primitives::Address;
use serde::Serialize;
use tracing::debug;

use meta_relay_core::contracts::IForwarderRecipient;
use meta_relay_core::RelayError;

use crate::rpc::{read_call, ContractReader};

/// What a target contract reports about its trusted forwarder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustReport {
    pub target: Address,
    pub forwarder: Address,
    pub trusted: bool,
    /// `None` when the target does not expose `trustedForwarder()`.
    pub registered_forwarder: Option<Address>,
    /// `None` when the target does not expose `versionRecipient()`.
    pub recipient_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PreflightAdapter<R> {
    reader: R,
}

impl<R: ContractReader> PreflightAdapter<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub async fn report(&self, target: Address, forwarder: Address) -> Result<TrustReport, RelayError> {
        let trusted = read_call(
            &self.reader,
            target,
            &IForwarderRecipient::isTrustedForwarderCall { forwarder },
        )
        .await?
        .trusted;

        let registered_forwarder =
            read_call(&self.reader, target, &IForwarderRecipient::trustedForwarderCall {})
                .await
                .map(|r| r.forwarder)
                .ok();
        let recipient_version =
            read_call(&self.reader, target, &IForwarderRecipient::versionRecipientCall {})
                .await
                .map(|r| r.version)
                .ok();

        debug!(%target, %forwarder, trusted, "trust preflight");
        Ok(TrustReport {
            target,
            forwarder,
            trusted,
            registered_forwarder,
            recipient_version,
        })
    }
}
