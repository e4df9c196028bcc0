//! Upgrade patterns.
//!
//! Each [`ProxyKind`] maps to one [`ProxyStrategy`] which knows how to build the proxy's
//! creation code, encode the initializer, decide who may upgrade and encode the upgrade
//! transaction. The set of kinds is closed so every rule can be enumerated and tested.

mod beacon;
mod transparent;
mod uups;

use alloy_core::primitives::{Address, B256, Bytes, b256};
use serde::{Deserialize, Serialize};

pub use beacon::BeaconStrategy;
pub use transparent::TransparentStrategy;
pub use uups::UupsStrategy;

use crate::{
    abi,
    artifact::{ArtifactRegistry, ContractArtifact},
    error::{DeployError, Result},
    ledger::DeploymentRecord,
};

/// EIP-1967 implementation slot: `keccak256("eip1967.proxy.implementation") - 1`.
pub const IMPLEMENTATION_SLOT: B256 =
    b256!("0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// EIP-1967 admin slot: `keccak256("eip1967.proxy.admin") - 1`.
pub const ADMIN_SLOT: B256 =
    b256!("0xb53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

/// EIP-1967 beacon slot: `keccak256("eip1967.proxy.beacon") - 1`.
pub const BEACON_SLOT: B256 =
    b256!("0xa3f0ad74e5423aebfd80d3ef4346578335a9a72aeaee59ff6cb3582b35133d50");

/// Artifact name of the plain EIP-1967 proxy used by UUPS deployments.
pub const ERC1967_PROXY: &str = "ERC1967Proxy";
/// Artifact name of the admin-gated transparent proxy.
pub const TRANSPARENT_PROXY: &str = "TransparentUpgradeableProxy";
/// Artifact name of the beacon holding the shared implementation pointer.
pub const UPGRADEABLE_BEACON: &str = "UpgradeableBeacon";
/// Artifact name of the proxy that reads its implementation from a beacon.
pub const BEACON_PROXY: &str = "BeaconProxy";

/// Upgrade pattern of a logical deployment. Fixed for the lifetime of the deployment.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProxyKind {
    /// Upgrade logic lives in the implementation (`upgradeToAndCall`).
    Uups,
    /// Upgrades go through an admin contract; user calls are forwarded.
    Transparent,
    /// Proxies read the implementation from a shared beacon.
    Beacon,
}

impl ProxyKind {
    /// The EIP-1967 slot in which the proxy stores its pointer.
    pub fn pointer_slot(&self) -> B256 {
        match self {
            Self::Uups | Self::Transparent => IMPLEMENTATION_SLOT,
            Self::Beacon => BEACON_SLOT,
        }
    }

    /// Build the strategy for this kind, resolving the proxy contracts it deploys.
    pub fn strategy(&self, registry: &ArtifactRegistry) -> Result<Box<dyn ProxyStrategy>> {
        Ok(match self {
            Self::Uups => Box::new(UupsStrategy::new(registry.resolve(ERC1967_PROXY)?)),
            Self::Transparent => Box::new(TransparentStrategy::new(
                registry.resolve(TRANSPARENT_PROXY)?,
            )),
            Self::Beacon => Box::new(BeaconStrategy::new(
                registry.resolve(UPGRADEABLE_BEACON)?,
                registry.resolve(BEACON_PROXY)?,
            )),
        })
    }
}

/// Creation code split into bytecode and ABI-encoded constructor arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitCode {
    pub bytecode: Bytes,
    pub constructor_args: Bytes,
}

impl InitCode {
    /// Bytecode without constructor arguments.
    pub fn bare(bytecode: Bytes) -> Self {
        Self {
            bytecode,
            constructor_args: Bytes::new(),
        }
    }

    /// Full creation payload: bytecode followed by constructor arguments.
    pub fn payload(&self) -> Bytes {
        [self.bytecode.as_ref(), self.constructor_args.as_ref()]
            .concat()
            .into()
    }
}

/// A transaction to an existing contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    pub data: Bytes,
}

/// Everything an authorization rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct UpgradeRequest<'a> {
    pub proxy: Address,
    pub new_implementation: Address,
    pub caller: Address,
    /// Current ledger record of the deployment being upgraded.
    pub record: &'a DeploymentRecord,
    /// Artifact of the new implementation.
    pub artifact: &'a ContractArtifact,
}

/// Outcome of [`ProxyStrategy::authorize_upgrade`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResult {
    Authorized,
    Denied { reason: String },
}

impl AuthorizationResult {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized)
    }

    /// Convert a denial into [`DeployError::UnauthorizedUpgrade`].
    pub fn into_result(self, request: &UpgradeRequest<'_>) -> Result<()> {
        match self {
            Self::Authorized => Ok(()),
            Self::Denied { reason } => Err(DeployError::UnauthorizedUpgrade {
                proxy: request.proxy,
                caller: request.caller,
                reason,
            }),
        }
    }

    fn owner_only(request: &UpgradeRequest<'_>, role: &str) -> Self {
        if request.caller == request.record.owner {
            Self::Authorized
        } else {
            Self::Denied {
                reason: format!("only the {role} {} may upgrade", request.record.owner),
            }
        }
    }
}

/// Behaviour of one upgrade pattern.
pub trait ProxyStrategy: Send + Sync {
    /// The kind this strategy implements.
    fn kind(&self) -> ProxyKind;

    /// Creation code of the proxy pointing at `pointer`.
    ///
    /// `pointer` is the implementation for UUPS and Transparent proxies and the beacon
    /// for Beacon proxies. `owner` receives upgrade rights where the pattern has an
    /// explicit owner.
    fn build_proxy_bytecode(&self, pointer: Address, owner: Address) -> Result<InitCode>;

    /// Creation code of a beacon pointing at `implementation`, for patterns that use one.
    fn beacon_bytecode(&self, _implementation: Address, _owner: Address) -> Option<InitCode> {
        None
    }

    /// Address of the admin contract created alongside `proxy`, for patterns that have one.
    fn admin_address(&self, _proxy: Address) -> Option<Address> {
        None
    }

    /// Reject implementations the pattern cannot safely proxy.
    fn validate_implementation(&self, _artifact: &ContractArtifact) -> Result<()> {
        Ok(())
    }

    /// Encode the call to the artifact's one-time initializer.
    ///
    /// Returns empty calldata when the artifact has no initializer and no arguments
    /// were supplied, meaning no initializer transaction is sent.
    fn encode_initializer(&self, artifact: &ContractArtifact, init_args: &[String]) -> Result<Bytes> {
        match artifact.initializer_signature.as_deref() {
            Some(signature) => abi::encode_initializer_call(signature, init_args),
            None if init_args.is_empty() => Ok(Bytes::new()),
            None => Err(DeployError::InitializerSignatureMismatch {
                signature: "<none>".to_string(),
                reason: format!(
                    "{} has no initializer but {} argument(s) were supplied",
                    artifact.name,
                    init_args.len()
                ),
            }),
        }
    }

    /// Decide whether `request.caller` may move the proxy to `request.new_implementation`.
    fn authorize_upgrade(&self, request: &UpgradeRequest<'_>) -> AuthorizationResult;

    /// The transaction that repoints the deployment at `new_implementation`.
    fn upgrade_call(
        &self,
        record: &DeploymentRecord,
        new_implementation: Address,
    ) -> Result<ContractCall>;
}
