use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration (loaded from vault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
    /// Seconds between retention/reconcile sweeps (default: 3600)
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory; each user's blobs live under `<root>/users/<id>/`
    pub root: PathBuf,
    /// Metadata store file (JSON)
    pub metadata_path: PathBuf,
    /// Staging directory where the upload transport leaves plaintext temp files
    pub staging_dir: PathBuf,
    /// Largest single upload accepted, in bytes
    pub max_upload_bytes: u64,
    /// Total stored bytes across all users before uploads are refused (0 = unlimited)
    pub max_total_bytes: u64,
    /// MIME types accepted for upload
    pub allowed_mime_types: Vec<String>,
}

/// Encryption parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
    /// Plaintext bytes per AEAD frame (default: 64 KiB)
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Days a trashed file is kept before the sweep purges it
    pub trash_days: u64,
    /// Run the reconciliation sweep together with the retention sweep
    pub reconcile_on_sweep: bool,
    /// Staging files and unreferenced blobs younger than this are left alone
    pub stale_after_secs: u64,
}

impl StorageConfig {
    /// Directory holding one user's encrypted blobs.
    pub fn is_allowed_mime(&self, mime: &str) -> bool {
        self.allowed_mime_types.iter().any(|m| m == mime)
    }
}

impl RetentionConfig {
    pub fn window_secs(&self) -> u64 {
        self.trash_days * 24 * 60 * 60
    }
}

/// Read a config file, falling back to defaults when it does not exist.
pub fn load_or_default(path: &Path) -> anyhow::Result<VaultConfig> {
    use anyhow::Context;

    if !path.exists() {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            path.display()
        );
        return Ok(VaultConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: VaultConfig =
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
    if config.crypto.chunk_size == 0 {
        anyhow::bail!("{}: crypto.chunk_size must be greater than zero", path.display());
    }
    Ok(config)
}

pub const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/gif",
    "image/webp",
    "application/pdf",
    "text/plain",
    "text/csv",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/zip",
    "application/x-zip-compressed",
];

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
            sweep_interval_secs: 3600,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/pocketvault/storage"),
            metadata_path: PathBuf::from("/var/lib/pocketvault/vault.json"),
            staging_dir: PathBuf::from("/var/lib/pocketvault/staging"),
            max_upload_bytes: 1024 * 1024 * 1024,
            max_total_bytes: 0,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
            chunk_size: 64 * 1024,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            trash_days: 30,
            reconcile_on_sweep: true,
            stale_after_secs: 24 * 60 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[daemon]
log_level = "debug"
log_format = "json"
sweep_interval_secs = 60

[storage]
root = "/srv/vault"
metadata_path = "/srv/vault/meta.json"
staging_dir = "/srv/vault/tmp"
max_upload_bytes = 1048576
max_total_bytes = 10485760
allowed_mime_types = ["text/plain"]

[crypto]
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 8
chunk_size = 16384

[retention]
trash_days = 7
reconcile_on_sweep = false
"#;
        let config: VaultConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.daemon.sweep_interval_secs, 60);
        assert_eq!(config.storage.root, PathBuf::from("/srv/vault"));
        assert_eq!(config.storage.max_total_bytes, 10485760);
        assert!(config.storage.is_allowed_mime("text/plain"));
        assert!(!config.storage.is_allowed_mime("image/png"));
        assert_eq!(config.crypto.argon2_mem_cost_kib, 131072);
        assert_eq!(config.crypto.chunk_size, 16384);
        assert_eq!(config.retention.trash_days, 7);
        assert!(!config.retention.reconcile_on_sweep);
    }

    #[test]
    fn test_parse_defaults() {
        let config: VaultConfig = toml::from_str("").unwrap();

        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.crypto.chunk_size, 64 * 1024);
        assert_eq!(config.retention.trash_days, 30);
        assert_eq!(config.retention.window_secs(), 30 * 86400);
        assert!(config.storage.is_allowed_mime("application/pdf"));
        assert!(!config.storage.is_allowed_mime("application/x-msdownload"));
    }

    #[test]
    fn test_load_rejects_zero_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.toml");
        std::fs::write(&path, "[crypto]\nchunk_size = 0\n").unwrap();
        let err = load_or_default(&path).unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.retention.trash_days, 30);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = VaultConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: VaultConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.storage.root, parsed.storage.root);
        assert_eq!(config.crypto.chunk_size, parsed.crypto.chunk_size);
    }
}
