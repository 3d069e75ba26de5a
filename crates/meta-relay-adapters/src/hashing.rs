use alloy::primitives::{keccak256, Address, U256, B256};
use alloy::sol_types::{Eip712Domain, SolStruct};

use meta_relay_core::contracts::IDigestHelper;
use meta_relay_core::{
    DigestParts, DigestPort, ForwardRequest, ForwarderDomain, RelayError, SigningScheme,
};

use crate::rpc::{read_call, ContractReader};

/// Packed personal-sign digest the forwarder re-derives on execution.
///
/// `keccak256(from ‖ to ‖ token ‖ txGas ‖ tokenGasPrice ‖ batchId ‖ batchNonce ‖ deadline ‖ keccak256(data))`,
/// addresses as 20 bytes, integers as 32-byte big-endian words.
pub fn personal_digest(request: &ForwardRequest) -> B256 {
    let mut packed = Vec::with_capacity(3 * 20 + 6 * 32);
    packed.extend_from_slice(request.from.as_slice());
    packed.extend_from_slice(request.to.as_slice());
    packed.extend_from_slice(request.token.as_slice());
    for word in [
        request.txGas,
        request.tokenGasPrice,
        request.batchId,
        request.batchNonce,
        request.deadline,
    ] {
        packed.extend_from_slice(&word.to_be_bytes::<32>());
    }
    packed.extend_from_slice(keccak256(&request.data).as_slice());
    keccak256(packed)
}

pub fn eip712_domain(domain: &ForwarderDomain) -> Eip712Domain {
    Eip712Domain::new(
        Some(domain.name.clone().into()),
        Some(domain.version.clone().into()),
        Some(U256::from(domain.chain_id)),
        Some(domain.verifying_contract),
        None,
    )
}

/// `keccak256(0x1901 ‖ domainSeparator ‖ hashStruct(request))`.
pub fn typed_digest(request: &ForwardRequest, domain: &ForwarderDomain) -> DigestParts {
    let separator = eip712_domain(domain).separator();
    let struct_hash = request.eip712_hash_struct();
    let mut buf = [0u8; 66];
    buf[0] = 0x19;
    buf[1] = 0x01;
    buf[2..34].copy_from_slice(separator.as_slice());
    buf[34..66].copy_from_slice(struct_hash.as_slice());
    DigestParts {
        digest: keccak256(buf),
        domain_separator: Some(separator),
    }
}

/// Off-chain digest computation for both schemes.
#[derive(Debug, Clone, Default)]
pub struct LocalDigestAdapter;

impl DigestPort for LocalDigestAdapter {
    async fn digest(
        &self,
        scheme: SigningScheme,
        request: &ForwardRequest,
        domain: &ForwarderDomain,
    ) -> Result<DigestParts, RelayError> {
        Ok(match scheme {
            SigningScheme::PersonalSign => DigestParts {
                digest: personal_digest(request),
                domain_separator: None,
            },
            SigningScheme::TypedData => typed_digest(request, domain),
        })
    }
}

/// Asks the on-chain digest helper for the personal-sign digest.
///
/// Typed-data digests still come from the local computation; the helper
/// only mirrors the packed scheme.
#[derive(Debug, Clone)]
pub struct HelperDigestAdapter<R> {
    reader: R,
    helper: Address,
}

impl<R: ContractReader> HelperDigestAdapter<R> {
    pub fn new(reader: R, helper: Address) -> Self {
        Self { reader, helper }
    }
}

impl<R: ContractReader> DigestPort for HelperDigestAdapter<R> {
    async fn digest(
        &self,
        scheme: SigningScheme,
        request: &ForwardRequest,
        domain: &ForwarderDomain,
    ) -> Result<DigestParts, RelayError> {
        match scheme {
            SigningScheme::PersonalSign => {
                let call = IDigestHelper::computeDigestCall {
                    req: request.clone(),
                };
                let digest = read_call(&self.reader, self.helper, &call).await?.digest;
                Ok(DigestParts {
                    digest,
                    domain_separator: None,
                })
            }
            SigningScheme::TypedData => Ok(typed_digest(request, domain)),
        }
    }
}
