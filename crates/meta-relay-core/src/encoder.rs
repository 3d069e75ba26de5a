//! Pure calldata construction. Nothing in here performs I/O.

use alloy::dyn_abi::{DynSolValue, JsonAbiExt, Specifier};
use alloy::json_abi::Function;
use alloy::primitives::{aliases::I96, Address, Bytes};
use alloy::sol_types::{SolCall, SolValue};

use crate::contracts::{
    IFlowAgreement, IForwarder, IHost, Operation, OPERATION_TYPE_CALL_AGREEMENT, PERMISSION_FULL,
};
use crate::domain::{BatchEnvelope, CallPayload, ForwardRequest, SignedAuthorization, SigningScheme};
use crate::ports::RelayError;

#[derive(Debug, Clone, Copy, Default)]
pub struct CallEncoder;

impl CallEncoder {
    /// Encode `signature` (e.g. `"transfer(address,uint256)"`) with dynamic arguments.
    pub fn encode_inner(
        &self,
        signature: &str,
        args: &[DynSolValue],
    ) -> Result<CallPayload, RelayError> {
        let function = Function::parse(signature).map_err(|e| {
            RelayError::Encoding(format!("invalid function signature '{signature}': {e}"))
        })?;
        if function.inputs.len() != args.len() {
            return Err(RelayError::Encoding(format!(
                "argument count mismatch for {}: expected {}, got {}",
                function.name,
                function.inputs.len(),
                args.len()
            )));
        }
        for (idx, (input, arg)) in function.inputs.iter().zip(args).enumerate() {
            let ty = input.resolve().map_err(|e| {
                RelayError::Encoding(format!("unsupported type '{}': {e}", input.ty))
            })?;
            if !ty.matches(arg) {
                return Err(RelayError::Encoding(format!(
                    "argument {idx} does not match type {}",
                    input.ty
                )));
            }
        }

        let encoded = function
            .abi_encode_input(args)
            .map_err(|e| RelayError::Encoding(format!("abi encoding failed: {e}")))?;
        Ok(CallPayload(Bytes::from(encoded)))
    }

    pub fn encode_grant(
        &self,
        token: Address,
        operator: Address,
        level: u8,
        allowance: I96,
        extra: Bytes,
    ) -> Result<CallPayload, RelayError> {
        if level & !PERMISSION_FULL != 0 {
            return Err(RelayError::Encoding(format!(
                "permission level {level} sets bits outside {PERMISSION_FULL:#05b}"
            )));
        }
        if allowance.is_negative() {
            return Err(RelayError::Encoding(
                "flow rate allowance must not be negative".to_owned(),
            ));
        }
        let call = IFlowAgreement::updateFlowOperatorPermissionsCall {
            token,
            flowOperator: operator,
            permissions: level,
            flowRateAllowance: allowance,
            ctx: extra,
        };
        Ok(CallPayload(Bytes::from(call.abi_encode())))
    }

    pub fn encode_revoke(&self, token: Address, operator: Address, extra: Bytes) -> CallPayload {
        let call = IFlowAgreement::revokeFlowOperatorWithFullControlCall {
            token,
            flowOperator: operator,
            ctx: extra,
        };
        CallPayload(Bytes::from(call.abi_encode()))
    }

    /// Host `callAgreement` around an agreement payload. Used by the direct path.
    pub fn wrap_agreement_call(
        &self,
        agreement: Address,
        payload: &CallPayload,
        user_data: &Bytes,
    ) -> CallPayload {
        let call = IHost::callAgreementCall {
            agreementClass: agreement,
            callData: payload.0.clone(),
            userData: user_data.clone(),
        };
        CallPayload(Bytes::from(call.abi_encode()))
    }

    pub fn operation(
        &self,
        operation_type: u32,
        target: Address,
        payload: &CallPayload,
    ) -> Operation {
        Operation {
            operationType: operation_type,
            target,
            data: payload.0.clone(),
        }
    }

    /// Batch entry calling an agreement; the host expects `abi.encode(callData, userData)`.
    pub fn call_agreement_operation(
        &self,
        agreement: Address,
        payload: &CallPayload,
        user_data: &Bytes,
    ) -> Operation {
        let data = (payload.0.clone(), user_data.clone()).abi_encode_params();
        Operation {
            operationType: OPERATION_TYPE_CALL_AGREEMENT,
            target: agreement,
            data: Bytes::from(data),
        }
    }

    pub fn wrap_batch(&self, operations: Vec<Operation>) -> Result<BatchEnvelope, RelayError> {
        if operations.is_empty() {
            return Err(RelayError::Encoding("batch must contain an operation".to_owned()));
        }
        let call = IHost::forwardBatchCallCall {
            operations: operations.clone(),
        };
        Ok(BatchEnvelope {
            operations,
            payload: CallPayload(Bytes::from(call.abi_encode())),
        })
    }

    /// Forwarder entry point matching the signing scheme of `auth`.
    pub fn encode_forwarder_call(
        &self,
        request: &ForwardRequest,
        auth: &SignedAuthorization,
    ) -> Result<CallPayload, RelayError> {
        let encoded = match auth.scheme {
            SigningScheme::PersonalSign => IForwarder::executePersonalSignCall {
                req: request.clone(),
                sig: auth.signature.clone(),
            }
            .abi_encode(),
            SigningScheme::TypedData => {
                let domain_separator = auth.domain_separator.ok_or_else(|| {
                    RelayError::Encoding("typed-data authorization without domain separator".to_owned())
                })?;
                IForwarder::executeEIP712Call {
                    req: request.clone(),
                    domainSeparator: domain_separator,
                    sig: auth.signature.clone(),
                }
                .abi_encode()
            }
        };
        Ok(CallPayload(Bytes::from(encoded)))
    }
}
