//! Function call encoding and return data decoding for read-only contract calls.
//!
//! Calls are described at runtime by a function name, typed arguments and the
//! expected output types. The selector is the first four bytes of the keccak256
//! hash of the canonical signature, e.g. `tokenURI(uint256)`.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Bytes, Selector, keccak256};

use crate::models::errors::{DecodeError, EncodeError};

#[derive(Debug, Clone, PartialEq)]
pub struct ContractCallRequest {
    pub function: String,
    pub inputs: Vec<DynSolValue>,
    pub outputs: Vec<DynSolType>,
}

impl ContractCallRequest {
    pub fn new(
        function: impl Into<String>,
        inputs: Vec<DynSolValue>,
        outputs: Vec<DynSolType>,
    ) -> Self {
        Self {
            function: function.into(),
            inputs,
            outputs,
        }
    }

    /// Zero-argument call returning a single string, e.g. `name()`.
    pub fn string_getter(function: impl Into<String>) -> Self {
        Self::new(function, Vec::new(), vec![DynSolType::String])
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        encode(&self.function, &self.inputs)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Vec<DynSolValue>, DecodeError> {
        decode(data, &self.outputs)
    }
}

/// Canonical signature of `function` called with `inputs`.
pub fn signature(function: &str, inputs: &[DynSolValue]) -> Result<String, EncodeError> {
    let types = inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            input
                .as_type()
                .map(|ty| ty.sol_type_name().into_owned())
                .ok_or_else(|| EncodeError::UnsupportedArgument {
                    function: function.to_string(),
                    index,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(format!("{}({})", function, types.join(",")))
}

pub fn selector(function: &str, inputs: &[DynSolValue]) -> Result<Selector, EncodeError> {
    let signature = signature(function, inputs)?;
    Ok(Selector::from_slice(&keccak256(signature.as_bytes())[..4]))
}

/// Selector followed by the ABI-encoded argument tuple.
pub fn encode(function: &str, inputs: &[DynSolValue]) -> Result<Bytes, EncodeError> {
    let selector = selector(function, inputs)?;
    let arguments = DynSolValue::Tuple(inputs.to_vec()).abi_encode_params();

    let mut data = Vec::with_capacity(4 + arguments.len());
    data.extend_from_slice(selector.as_slice());
    data.extend_from_slice(&arguments);
    Ok(Bytes::from(data))
}

/// Decodes `data` against `outputs`, in order.
///
/// Empty return data decodes to no values: calls against accounts without code
/// succeed with `0x`, which is not treated as malformed.
pub fn decode(data: &[u8], outputs: &[DynSolType]) -> Result<Vec<DynSolValue>, DecodeError> {
    if data.is_empty() || outputs.is_empty() {
        return Ok(Vec::new());
    }

    match DynSolType::Tuple(outputs.to_vec()).abi_decode_params(data)? {
        DynSolValue::Tuple(values) => Ok(values),
        value => Ok(vec![value]),
    }
}
