use alloy_core::{dyn_abi::DynSolValue, primitives::Address};

use super::{AuthorizationResult, ContractCall, InitCode, ProxyKind, ProxyStrategy, UpgradeRequest};
use crate::{
    abi,
    artifact::ContractArtifact,
    error::{DeployError, Result},
    ledger::DeploymentRecord,
};

const UPGRADE_AND_CALL: &str = "upgradeAndCall(address,address,bytes)";

/// Transparent: the proxy deploys its own `ProxyAdmin`, owned by the deployer, and only
/// that admin may upgrade.
#[derive(Debug, Clone)]
pub struct TransparentStrategy {
    proxy: ContractArtifact,
}

impl TransparentStrategy {
    /// `proxy` is the compiled `TransparentUpgradeableProxy`.
    pub fn new(proxy: ContractArtifact) -> Self {
        Self { proxy }
    }
}

impl ProxyStrategy for TransparentStrategy {
    fn kind(&self) -> ProxyKind {
        ProxyKind::Transparent
    }

    fn build_proxy_bytecode(&self, implementation: Address, owner: Address) -> Result<InitCode> {
        Ok(InitCode {
            bytecode: self.proxy.bytecode.clone(),
            constructor_args: abi::encode_constructor_args(vec![
                DynSolValue::Address(implementation),
                DynSolValue::Address(owner),
                DynSolValue::Bytes(Vec::new()),
            ]),
        })
    }

    /// The `ProxyAdmin` is the first contract the proxy creates, so it lives at the
    /// proxy's CREATE address for nonce 1.
    fn admin_address(&self, proxy: Address) -> Option<Address> {
        Some(proxy.create(1))
    }

    fn authorize_upgrade(&self, request: &UpgradeRequest<'_>) -> AuthorizationResult {
        AuthorizationResult::owner_only(request, "proxy admin owner")
    }

    fn upgrade_call(
        &self,
        record: &DeploymentRecord,
        new_implementation: Address,
    ) -> Result<ContractCall> {
        let admin = record
            .admin_address
            .or_else(|| self.admin_address(record.proxy_address))
            .ok_or_else(|| DeployError::Abi("transparent proxy without admin".to_string()))?;

        Ok(ContractCall {
            to: admin,
            data: abi::encode_call(
                UPGRADE_AND_CALL,
                &[
                    DynSolValue::Address(record.proxy_address),
                    DynSolValue::Address(new_implementation),
                    DynSolValue::Bytes(Vec::new()),
                ],
            )?,
        })
    }
}
