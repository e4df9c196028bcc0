//! ABI helpers built on `alloy-core`'s dynamic ABI support.

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier},
    json_abi::Function,
    primitives::Bytes,
};

use crate::error::{DeployError, Result};

/// Parse a human-readable function signature such as `initialize(address,uint256)`.
pub fn parse_function(signature: &str) -> Result<Function> {
    Function::parse(signature).map_err(|e| DeployError::Abi(format!("`{signature}`: {e}")))
}

/// Encode a call (selector followed by arguments) to the function with the given signature.
pub fn encode_call(signature: &str, args: &[DynSolValue]) -> Result<Bytes> {
    let function = parse_function(signature)?;
    function
        .abi_encode_input(args)
        .map(Bytes::from)
        .map_err(|e| DeployError::Abi(format!("`{signature}`: {e}")))
}

/// ABI-encode constructor arguments, without a selector.
pub fn encode_constructor_args(args: Vec<DynSolValue>) -> Bytes {
    Bytes::from(DynSolValue::Tuple(args).abi_encode_params())
}

/// Encode an initializer call from textual arguments.
///
/// Each argument is coerced to the type declared in `signature`. Any arity or type
/// mismatch is reported as [`DeployError::InitializerSignatureMismatch`].
pub fn encode_initializer_call(signature: &str, args: &[String]) -> Result<Bytes> {
    let mismatch = |reason: String| DeployError::InitializerSignatureMismatch {
        signature: signature.to_string(),
        reason,
    };

    let function = Function::parse(signature).map_err(|e| mismatch(e.to_string()))?;

    if function.inputs.len() != args.len() {
        return Err(mismatch(format!(
            "expected {} argument(s), got {}",
            function.inputs.len(),
            args.len()
        )));
    }

    let values = function
        .inputs
        .iter()
        .zip(args)
        .enumerate()
        .map(|(index, (param, arg))| {
            let ty: DynSolType = param
                .resolve()
                .map_err(|e| mismatch(format!("argument {index}: {e}")))?;
            ty.coerce_str(arg)
                .map_err(|e| mismatch(format!("argument {index} `{arg}` is not a valid {ty}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    function
        .abi_encode_input(&values)
        .map(Bytes::from)
        .map_err(|e| mismatch(e.to_string()))
}
