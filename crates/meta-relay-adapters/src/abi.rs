//! Textual call arguments to ABI values for the generic `call` path.

use std::str::FromStr;

use alloy::dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy::json_abi::Function;
use alloy::primitives::{Address, Bytes, FixedBytes, I256, U256};
use serde_json::Value;

use meta_relay_core::{CallEncoder, CallPayload, RelayError};

/// Parse `args` against the inputs of `signature`.
///
/// Scalars are taken verbatim (surrounding quotes stripped); arrays and
/// tuples are read as JSON, e.g. `[1,2]` or `["0xabc...", true]`.
pub fn parse_call_args(signature: &str, args: &[String]) -> Result<Vec<DynSolValue>, RelayError> {
    let function = Function::parse(signature)
        .map_err(|e| RelayError::Encoding(format!("invalid function signature '{signature}': {e}")))?;
    if function.inputs.len() != args.len() {
        return Err(RelayError::Encoding(format!(
            "argument count mismatch: expected {}, got {}",
            function.inputs.len(),
            args.len()
        )));
    }

    let mut values = Vec::with_capacity(args.len());
    for (idx, (input, arg)) in function.inputs.iter().zip(args).enumerate() {
        let ty = input
            .resolve()
            .map_err(|e| RelayError::Encoding(format!("unsupported type '{}': {e}", input.ty)))?;
        let parsed = match &ty {
            DynSolType::Array(_) | DynSolType::FixedArray(..) | DynSolType::Tuple(_) => {
                serde_json::from_str::<Value>(arg).unwrap_or(Value::String(arg.clone()))
            }
            _ => Value::String(arg.trim().trim_matches('"').to_owned()),
        };
        let value = parse_dyn_value(&parsed, &ty)
            .map_err(|e| RelayError::Encoding(format!("argument {idx} ({}): {e}", input.ty)))?;
        values.push(value);
    }
    Ok(values)
}

pub fn encode_call(signature: &str, args: &[String]) -> Result<CallPayload, RelayError> {
    let values = parse_call_args(signature, args)?;
    CallEncoder.encode_inner(signature, &values)
}

fn parse_dyn_value(value: &Value, ty: &DynSolType) -> Result<DynSolValue, String> {
    match ty {
        DynSolType::Bool => match value {
            Value::Bool(b) => Ok(DynSolValue::Bool(*b)),
            Value::String(s) => s
                .parse()
                .map(DynSolValue::Bool)
                .map_err(|_| "expected bool".to_owned()),
            _ => Err("expected bool".to_owned()),
        },
        DynSolType::Uint(bits) => {
            let raw = scalar_text(value).ok_or_else(|| "expected uint string/number".to_owned())?;
            U256::from_str(&raw)
                .map(|x| DynSolValue::Uint(x, *bits))
                .map_err(|e| format!("invalid uint: {e}"))
        }
        DynSolType::Int(bits) => {
            let raw = scalar_text(value).ok_or_else(|| "expected int string/number".to_owned())?;
            I256::from_str(&raw)
                .map(|x| DynSolValue::Int(x, *bits))
                .map_err(|e| format!("invalid int: {e}"))
        }
        DynSolType::Address => value
            .as_str()
            .ok_or_else(|| "expected address string".to_owned())
            .and_then(|s| {
                Address::from_str(s)
                    .map(DynSolValue::Address)
                    .map_err(|e| format!("invalid address: {e}"))
            }),
        DynSolType::FixedBytes(size) => value
            .as_str()
            .ok_or_else(|| "expected fixed bytes string".to_owned())
            .and_then(|s| {
                let raw = Bytes::from_str(s).map_err(|e| format!("invalid fixed bytes: {e}"))?;
                if raw.len() != *size {
                    return Err(format!("expected {size} bytes, got {}", raw.len()));
                }
                let mut word = FixedBytes::<32>::ZERO;
                word[..*size].copy_from_slice(&raw);
                Ok(DynSolValue::FixedBytes(word, *size))
            }),
        DynSolType::Bytes => value
            .as_str()
            .ok_or_else(|| "expected bytes string".to_owned())
            .and_then(|s| {
                Bytes::from_str(s)
                    .map(|x| DynSolValue::Bytes(x.into()))
                    .map_err(|e| format!("invalid bytes: {e}"))
            }),
        DynSolType::String => value
            .as_str()
            .map(|s| DynSolValue::String(s.to_owned()))
            .ok_or_else(|| "expected string".to_owned()),
        DynSolType::Array(inner) => {
            let arr = value
                .as_array()
                .ok_or_else(|| "expected array for dynamic array".to_owned())?;
            arr.iter()
                .map(|v| parse_dyn_value(v, inner))
                .collect::<Result<Vec<_>, _>>()
                .map(DynSolValue::Array)
        }
        DynSolType::FixedArray(inner, size) => {
            let arr = value
                .as_array()
                .ok_or_else(|| "expected array for fixed array".to_owned())?;
            if arr.len() != *size {
                return Err(format!(
                    "fixed array length mismatch: expected {}, got {}",
                    size,
                    arr.len()
                ));
            }
            arr.iter()
                .map(|v| parse_dyn_value(v, inner))
                .collect::<Result<Vec<_>, _>>()
                .map(DynSolValue::FixedArray)
        }
        DynSolType::Tuple(inner) => {
            let arr = value
                .as_array()
                .ok_or_else(|| "expected tuple array".to_owned())?;
            if arr.len() != inner.len() {
                return Err(format!(
                    "tuple length mismatch: expected {}, got {}",
                    inner.len(),
                    arr.len()
                ));
            }
            arr.iter()
                .zip(inner.iter())
                .map(|(v, t)| parse_dyn_value(v, t))
                .collect::<Result<Vec<_>, _>>()
                .map(DynSolValue::Tuple)
        }
        other => Err(format!("type {} is not supported", other.sol_type_name())),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
