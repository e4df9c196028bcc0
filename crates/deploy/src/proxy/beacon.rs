use alloy_core::{dyn_abi::DynSolValue, primitives::Address};

use super::{AuthorizationResult, ContractCall, InitCode, ProxyKind, ProxyStrategy, UpgradeRequest};
use crate::{
    abi,
    artifact::ContractArtifact,
    error::{DeployError, Result},
    ledger::DeploymentRecord,
};

const UPGRADE_TO: &str = "upgradeTo(address)";

/// Beacon: proxies look up the implementation in an `UpgradeableBeacon`; upgrading the
/// beacon moves every proxy attached to it.
#[derive(Debug, Clone)]
pub struct BeaconStrategy {
    beacon: ContractArtifact,
    proxy: ContractArtifact,
}

impl BeaconStrategy {
    pub fn new(beacon: ContractArtifact, proxy: ContractArtifact) -> Self {
        Self { beacon, proxy }
    }
}

impl ProxyStrategy for BeaconStrategy {
    fn kind(&self) -> ProxyKind {
        ProxyKind::Beacon
    }

    fn build_proxy_bytecode(&self, beacon: Address, _owner: Address) -> Result<InitCode> {
        Ok(InitCode {
            bytecode: self.proxy.bytecode.clone(),
            constructor_args: abi::encode_constructor_args(vec![
                DynSolValue::Address(beacon),
                DynSolValue::Bytes(Vec::new()),
            ]),
        })
    }

    fn beacon_bytecode(&self, implementation: Address, owner: Address) -> Option<InitCode> {
        Some(InitCode {
            bytecode: self.beacon.bytecode.clone(),
            constructor_args: abi::encode_constructor_args(vec![
                DynSolValue::Address(implementation),
                DynSolValue::Address(owner),
            ]),
        })
    }

    fn authorize_upgrade(&self, request: &UpgradeRequest<'_>) -> AuthorizationResult {
        AuthorizationResult::owner_only(request, "beacon owner")
    }

    fn upgrade_call(
        &self,
        record: &DeploymentRecord,
        new_implementation: Address,
    ) -> Result<ContractCall> {
        let beacon = record.beacon_address.ok_or_else(|| {
            DeployError::Abi(format!("{} has no recorded beacon", record.key()))
        })?;

        Ok(ContractCall {
            to: beacon,
            data: abi::encode_call(UPGRADE_TO, &[DynSolValue::Address(new_implementation)])?,
        })
    }
}
