use alloy_core::{dyn_abi::DynSolValue, primitives::Address};

use super::{AuthorizationResult, ContractCall, InitCode, ProxyKind, ProxyStrategy, UpgradeRequest};
use crate::{
    abi,
    artifact::ContractArtifact,
    error::{DeployError, Result},
    ledger::DeploymentRecord,
};

/// Function every UUPS implementation must expose to stay upgradeable.
pub(crate) const UPGRADE_TO_AND_CALL: &str = "upgradeToAndCall(address,bytes)";

/// UUPS: a plain EIP-1967 proxy whose upgrade entry point lives in the implementation.
#[derive(Debug, Clone)]
pub struct UupsStrategy {
    proxy: ContractArtifact,
}

impl UupsStrategy {
    /// `proxy` is the compiled `ERC1967Proxy`.
    pub fn new(proxy: ContractArtifact) -> Self {
        Self { proxy }
    }
}

impl ProxyStrategy for UupsStrategy {
    fn kind(&self) -> ProxyKind {
        ProxyKind::Uups
    }

    fn build_proxy_bytecode(&self, implementation: Address, _owner: Address) -> Result<InitCode> {
        Ok(InitCode {
            bytecode: self.proxy.bytecode.clone(),
            constructor_args: abi::encode_constructor_args(vec![
                DynSolValue::Address(implementation),
                DynSolValue::Bytes(Vec::new()),
            ]),
        })
    }

    // An implementation without `upgradeToAndCall` would leave the proxy frozen forever.
    fn validate_implementation(&self, artifact: &ContractArtifact) -> Result<()> {
        if artifact.has_function(UPGRADE_TO_AND_CALL) {
            Ok(())
        } else {
            Err(DeployError::InvalidArtifact {
                name: artifact.name.clone(),
                reason: format!("UUPS implementations must expose `{UPGRADE_TO_AND_CALL}`"),
            })
        }
    }

    fn authorize_upgrade(&self, request: &UpgradeRequest<'_>) -> AuthorizationResult {
        if !request.artifact.has_function(UPGRADE_TO_AND_CALL) {
            return AuthorizationResult::Denied {
                reason: format!(
                    "{} does not expose `{UPGRADE_TO_AND_CALL}`",
                    request.artifact.name
                ),
            };
        }

        AuthorizationResult::owner_only(request, "implementation owner")
    }

    fn upgrade_call(
        &self,
        record: &DeploymentRecord,
        new_implementation: Address,
    ) -> Result<ContractCall> {
        Ok(ContractCall {
            to: record.proxy_address,
            data: abi::encode_call(
                UPGRADE_TO_AND_CALL,
                &[
                    DynSolValue::Address(new_implementation),
                    DynSolValue::Bytes(Vec::new()),
                ],
            )?,
        })
    }
}
