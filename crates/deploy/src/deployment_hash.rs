use sha2::{Digest, Sha256};

/// Version tag of an implementation, derived from its creation bytecode.
///
/// The planner compares this against the `abi_version` stored in the ledger to decide
/// whether a redeploy is a no-op or an upgrade. Only the creation bytecode is hashed:
/// ABI-only changes (comments, renamed outputs) never trigger an upgrade.
///
/// The hash is deterministic - the same bytecode always produces the same hex string.
pub fn bytecode_hash(bytecode: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytecode);
    hex::encode(hasher.finalize())
}

/// Shortened form of a bytecode hash for log lines and tables.
pub fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
