use alloy::primitives::{eip191_hash_message, Address, Bytes, PrimitiveSignature, B256};
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::{
    ForwardRequest, ForwarderDomain, SignedAuthorization, SigningScheme, TypedSigningPayload,
};
use crate::ports::{DigestPort, DigestParts, RelayError, SignerPort};

/// Produces the authorization the forwarder verifies before executing a request.
pub struct SignatureService<D, G>
where
    D: DigestPort,
    G: SignerPort,
{
    pub digests: D,
    pub signer: G,
}

impl<D, G> SignatureService<D, G>
where
    D: DigestPort,
    G: SignerPort,
{
    pub fn new(digests: D, signer: G) -> Self {
        Self { digests, signer }
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    pub async fn digest(
        &self,
        scheme: SigningScheme,
        request: &ForwardRequest,
        domain: &ForwarderDomain,
    ) -> Result<DigestParts, RelayError> {
        self.digests.digest(scheme, request, domain).await
    }

    /// Digest, sign, then check the signature recovers to `request.from`.
    pub async fn authorize(
        &self,
        scheme: SigningScheme,
        request: &ForwardRequest,
        domain: &ForwarderDomain,
    ) -> Result<SignedAuthorization, RelayError> {
        let signer = self.signer.address();
        if request.from != signer {
            return Err(RelayError::Config(format!(
                "request is from {} but the active signer is {signer}",
                request.from
            )));
        }

        let parts = self.digest(scheme, request, domain).await?;
        let signature = match scheme {
            SigningScheme::PersonalSign => {
                self.signer.sign_message(parts.digest.as_slice()).await?
            }
            SigningScheme::TypedData => {
                let payload = TypedSigningPayload {
                    signing_hash: parts.digest,
                    typed_data: typed_data_document(request, domain),
                };
                self.signer.sign_typed_data(&payload).await?
            }
        };

        let recovered = recover_signer(scheme, parts.digest, &signature)?;
        if recovered != request.from {
            return Err(RelayError::SignatureMismatch {
                expected: request.from,
                recovered,
            });
        }
        debug!(?scheme, digest = %parts.digest, signer = %recovered, "forward request signed");

        Ok(SignedAuthorization {
            scheme,
            digest: parts.digest,
            signature,
            domain_separator: parts.domain_separator,
        })
    }
}

/// Hash the signature was actually produced over for `scheme`.
pub fn signed_hash(scheme: SigningScheme, digest: B256) -> B256 {
    match scheme {
        SigningScheme::PersonalSign => eip191_hash_message(digest),
        SigningScheme::TypedData => digest,
    }
}

pub fn recover_signer(
    scheme: SigningScheme,
    digest: B256,
    signature: &Bytes,
) -> Result<Address, RelayError> {
    let parsed = PrimitiveSignature::from_raw(signature.as_ref())
        .map_err(|e| RelayError::Encoding(format!("invalid signature bytes: {e}")))?;
    parsed
        .recover_address_from_prehash(&signed_hash(scheme, digest))
        .map_err(|e| RelayError::Encoding(format!("signature recovery failed: {e}")))
}

/// `eth_signTypedData_v4` document for a forward request.
pub fn typed_data_document(request: &ForwardRequest, domain: &ForwarderDomain) -> Value {
    json!({
        "types": {
            "EIP712Domain": [
                {"name": "name", "type": "string"},
                {"name": "version", "type": "string"},
                {"name": "chainId", "type": "uint256"},
                {"name": "verifyingContract", "type": "address"}
            ],
            "ERC20ForwardRequest": [
                {"name": "from", "type": "address"},
                {"name": "to", "type": "address"},
                {"name": "token", "type": "address"},
                {"name": "txGas", "type": "uint256"},
                {"name": "tokenGasPrice", "type": "uint256"},
                {"name": "batchId", "type": "uint256"},
                {"name": "batchNonce", "type": "uint256"},
                {"name": "deadline", "type": "uint256"},
                {"name": "data", "type": "bytes"}
            ]
        },
        "primaryType": "ERC20ForwardRequest",
        "domain": {
            "name": domain.name,
            "version": domain.version,
            "chainId": domain.chain_id,
            "verifyingContract": domain.verifying_contract.to_string(),
        },
        "message": {
            "from": request.from.to_string(),
            "to": request.to.to_string(),
            "token": request.token.to_string(),
            "txGas": request.txGas.to_string(),
            "tokenGasPrice": request.tokenGasPrice.to_string(),
            "batchId": request.batchId.to_string(),
            "batchNonce": request.batchNonce.to_string(),
            "deadline": request.deadline.to_string(),
            "data": request.data.to_string(),
        }
    })
}
