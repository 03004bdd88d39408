//! Mapping lower-layer errors into the caller-facing taxonomy.

use tracing::warn;
use vault_core::VaultError;
use vault_crypto::CryptoError;
use vault_storage::GuardError;

pub(crate) fn from_crypto(e: CryptoError) -> VaultError {
    match e {
        CryptoError::Integrity(msg) => VaultError::Integrity(msg),
        CryptoError::InvalidInput(msg) => VaultError::StorageBackend(format!("crypto input: {msg}")),
        CryptoError::Kdf(msg) => VaultError::StorageBackend(format!("key derivation: {msg}")),
        CryptoError::Io(io) => VaultError::from(io),
    }
}

pub(crate) fn from_guard(e: GuardError) -> VaultError {
    match e {
        GuardError::Escape { base, candidate } => {
            warn!(
                base = %base.display(),
                candidate = %candidate.display(),
                "path escape rejected"
            );
            VaultError::Validation("invalid file path".into())
        }
        GuardError::Resolve { path, source } => {
            VaultError::StorageBackend(format!("resolving {}: {source}", path.display()))
        }
    }
}
