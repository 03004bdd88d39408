//! Argon2id parameter plumbing and off-runtime key work.
//!
//! Argon2id is slow and memory-hungry, so every call runs on
//! tokio's blocking pool instead of an async worker.

use secrecy::{ExposeSecret, SecretString};
use vault_core::config::CryptoConfig;
use vault_core::{KdfSettings, VaultError, VaultResult};
use vault_crypto::{derive_file_key, derive_master_key, FileKey, KdfParams};

use crate::error::from_crypto;
use crate::session::SessionSecret;

/// Argon2id parameters new accounts are created with.
pub fn kdf_params(cfg: &CryptoConfig) -> KdfParams {
    KdfParams {
        mem_cost_kib: cfg.argon2_mem_cost_kib,
        time_cost: cfg.argon2_time_cost,
        parallelism: cfg.argon2_parallelism,
    }
}

pub(crate) fn params_from_settings(s: &KdfSettings) -> KdfParams {
    KdfParams {
        mem_cost_kib: s.mem_cost_kib,
        time_cost: s.time_cost,
        parallelism: s.parallelism,
    }
}

pub(crate) fn settings_from_params(p: &KdfParams) -> KdfSettings {
    KdfSettings {
        mem_cost_kib: p.mem_cost_kib,
        time_cost: p.time_cost,
        parallelism: p.parallelism,
    }
}

/// Owned copy of a secret that can move into a blocking task.
pub(crate) fn owned_secret(s: &SecretString) -> SecretString {
    SecretString::from(s.expose_secret().to_string())
}

/// Run `f` on the blocking pool.
pub(crate) async fn blocking<T, F>(what: &'static str, f: F) -> VaultResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::StorageBackend(format!("{what} task failed: {e}")))
}

/// Master key from the session's password, salt and stored parameters,
/// then the per-file key for `context`.
pub(crate) async fn file_key(secret: &SessionSecret, context: &str) -> VaultResult<FileKey> {
    let password = owned_secret(secret.password());
    let salt = *secret.salt();
    let params = secret.kdf().clone();
    let context = context.to_string();
    blocking("key derivation", move || {
        let master = derive_master_key(&password, &salt, &params)?;
        derive_file_key(&master, &context)
    })
    .await?
    .map_err(from_crypto)
}
