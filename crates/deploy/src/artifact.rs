//! Compiled contract artifacts and the registry that resolves them by name.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::{json_abi::JsonAbi, primitives::Bytes};
use serde::{Deserialize, Serialize};

use crate::{
    deployment_hash::bytecode_hash,
    error::{DeployError, Result},
};

/// Name of the function used as initializer when none is configured.
pub const DEFAULT_INITIALIZER: &str = "initialize";

/// A compiled contract: creation bytecode, ABI and designated initializer.
///
/// Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractArtifact {
    /// Contract name, as used for lookups.
    pub name: String,
    /// Creation bytecode.
    pub bytecode: Bytes,
    /// Contract ABI.
    pub abi: JsonAbi,
    /// Signature of the one-time initializer, e.g. `initialize(address)`.
    ///
    /// `None` when the contract has no initializer.
    pub initializer_signature: Option<String>,
}

impl ContractArtifact {
    /// Create an artifact, deriving the initializer from the ABI's `initialize` function.
    pub fn new(name: impl Into<String>, bytecode: Bytes, abi: JsonAbi) -> Self {
        let initializer_signature = abi
            .function(DEFAULT_INITIALIZER)
            .and_then(|overloads| overloads.first())
            .map(|function| function.signature());

        Self {
            name: name.into(),
            bytecode,
            abi,
            initializer_signature,
        }
    }

    /// Override the initializer signature.
    pub fn with_initializer(mut self, signature: impl Into<String>) -> Self {
        self.initializer_signature = Some(signature.into());
        self
    }

    /// Hex SHA-256 of the creation bytecode, stored as the record's `abi_version`.
    pub fn bytecode_hash(&self) -> String {
        bytecode_hash(&self.bytecode)
    }

    /// Whether the ABI declares a function with exactly this signature.
    pub fn has_function(&self, signature: &str) -> bool {
        self.abi.functions().any(|f| f.signature() == signature)
    }
}

/// Artifact layouts emitted by the common toolchains.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    /// Truffle and Hardhat: `"bytecode": "0x…"`.
    Hex(String),
    /// Foundry: `"bytecode": { "object": "0x…", … }`.
    Object { object: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    contract_name: Option<String>,
    abi: JsonAbi,
    bytecode: RawBytecode,
}

impl RawArtifact {
    fn into_artifact(self, fallback_name: &str) -> Result<ContractArtifact, String> {
        let name = self
            .contract_name
            .unwrap_or_else(|| fallback_name.to_string());

        let hex = match self.bytecode {
            RawBytecode::Hex(hex) => hex,
            RawBytecode::Object { object } => object,
        };

        // Unlinked libraries leave `__$…$__` placeholders in the bytecode.
        if hex.contains("__") {
            return Err(format!("{name} has unlinked library references"));
        }

        let bytecode: Bytes = hex
            .parse()
            .map_err(|e| format!("{name} has malformed bytecode: {e}"))?;

        if bytecode.is_empty() {
            return Err(format!("{name} has no creation bytecode"));
        }

        Ok(ContractArtifact::new(name, bytecode, self.abi))
    }
}

/// Resolves logical contract names to compiled artifacts.
#[derive(Debug, Clone, Default)]
pub struct ArtifactRegistry {
    artifacts: BTreeMap<String, ContractArtifact>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact, replacing any artifact with the same name.
    pub fn insert(&mut self, artifact: ContractArtifact) {
        self.artifacts.insert(artifact.name.clone(), artifact);
    }

    /// Builder-style [`ArtifactRegistry::insert`].
    pub fn with(mut self, artifact: ContractArtifact) -> Self {
        self.insert(artifact);
        self
    }

    /// Resolve a contract by name.
    pub fn resolve(&self, name: &str) -> Result<ContractArtifact> {
        self.artifacts
            .get(name)
            .cloned()
            .ok_or_else(|| DeployError::ArtifactNotFound(name.to_string()))
    }

    /// Names of all registered artifacts, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Index every compiled artifact found under `dir`.
    ///
    /// Understands Truffle, Hardhat and Foundry output. JSON files that are not
    /// deployable artifacts (build info, interfaces, unlinked contracts) are skipped.
    /// When two files declare the same contract the first one found wins.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(DeployError::storage(
                "Artifacts directory not found",
                dir.display(),
            ));
        }

        let mut registry = Self::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let mut entries = std::fs::read_dir(&current)
                .map_err(|e| DeployError::storage("Failed to read artifacts directory", e))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .collect::<Vec<PathBuf>>();
            entries.sort();

            for path in entries {
                if path.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "json") {
                    registry.load_file(&path);
                }
            }
        }

        tracing::debug!(
            dir = %dir.display(),
            artifacts = registry.len(),
            "Loaded contract artifacts"
        );

        Ok(registry)
    }

    fn load_file(&mut self, path: &Path) {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();

        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<RawArtifact>(&content).map_err(|e| e.to_string())
            })
            .and_then(|raw| raw.into_artifact(stem));

        match parsed {
            Ok(artifact) if self.artifacts.contains_key(&artifact.name) => {
                tracing::warn!(
                    contract = %artifact.name,
                    path = %path.display(),
                    "Duplicate artifact ignored"
                );
            }
            Ok(artifact) => self.insert(artifact),
            Err(reason) => {
                tracing::trace!(path = %path.display(), %reason, "Skipping non-deployable JSON file");
            }
        }
    }
}
