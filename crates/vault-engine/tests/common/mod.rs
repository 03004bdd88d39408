//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use secrecy::SecretString;
use tempfile::TempDir;
use vault_core::config::VaultConfig;
use vault_core::roles::Role;
use vault_core::types::ConfigEntry;
use vault_core::{FileId, FileRecord, UserId, UserRecord};
use vault_engine::{shared, Accounts, JsonStore, MetadataStore, Session, SharedStore, Vault};
use vault_crypto::KdfParams;

/// Switches a test can flip to make the store misbehave.
#[derive(Clone, Default)]
pub struct Faults {
    pub fail_remove_file: Arc<AtomicBool>,
    pub fail_reads: Arc<AtomicBool>,
    pub fail_insert_file: Arc<AtomicBool>,
}

impl Faults {
    pub fn set_fail_remove(&self, on: bool) {
        self.fail_remove_file.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_insert_file(&self, on: bool) {
        self.fail_insert_file.store(on, Ordering::SeqCst);
    }
}

/// JSON store wrapper that fails on demand, standing in for a crash or a
/// broken database between two steps.
pub struct FlakyStore {
    inner: JsonStore,
    faults: Faults,
}

impl FlakyStore {
    fn read_guard(&self) -> Result<()> {
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            bail!("simulated read failure");
        }
        Ok(())
    }
}

impl MetadataStore for FlakyStore {
    fn user(&self, id: UserId) -> Result<Option<UserRecord>> {
        self.read_guard()?;
        self.inner.user(id)
    }
    fn user_by_name(&self, username: &str) -> Result<Option<UserRecord>> {
        self.read_guard()?;
        self.inner.user_by_name(username)
    }
    fn users(&self) -> Result<Vec<UserRecord>> {
        self.read_guard()?;
        self.inner.users()
    }
    fn allocate_user_id(&mut self) -> Result<UserId> {
        self.inner.allocate_user_id()
    }
    fn insert_user(&mut self, user: UserRecord) -> Result<()> {
        self.inner.insert_user(user)
    }
    fn set_user_role(&mut self, id: UserId, role: Role) -> Result<bool> {
        self.inner.set_user_role(id, role)
    }
    fn allocate_file_id(&mut self) -> Result<FileId> {
        self.inner.allocate_file_id()
    }
    fn file(&self, id: FileId) -> Result<Option<FileRecord>> {
        self.read_guard()?;
        self.inner.file(id)
    }
    fn files(&self) -> Result<Vec<FileRecord>> {
        self.read_guard()?;
        self.inner.files()
    }
    fn insert_file(&mut self, file: FileRecord) -> Result<()> {
        if self.faults.fail_insert_file.load(Ordering::SeqCst) {
            bail!("simulated failure writing the file row");
        }
        self.inner.insert_file(file)
    }
    fn update_file(&mut self, file: FileRecord) -> Result<bool> {
        self.inner.update_file(file)
    }
    fn remove_file(&mut self, id: FileId) -> Result<bool> {
        if self.faults.fail_remove_file.load(Ordering::SeqCst) {
            bail!("simulated crash before metadata delete");
        }
        self.inner.remove_file(id)
    }
    fn config_value(&self, key: &str) -> Result<Option<ConfigEntry>> {
        self.inner.config_value(key)
    }
    fn set_config_value(&mut self, key: &str, value: &str) -> Result<()> {
        self.inner.set_config_value(key, value)
    }
}

pub fn fast_kdf() -> KdfParams {
    KdfParams {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}

pub fn password(s: &str) -> SecretString {
    SecretString::from(s)
}

pub struct Harness {
    pub dir: TempDir,
    pub config: VaultConfig,
    pub store: SharedStore,
    pub faults: Faults,
    pub vault: Vault,
    pub accounts: Accounts,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut VaultConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = VaultConfig::default();
        config.storage.root = dir.path().join("storage");
        config.storage.metadata_path = dir.path().join("vault.json");
        config.storage.staging_dir = dir.path().join("staging");
        config.crypto.argon2_mem_cost_kib = 1024;
        config.crypto.argon2_time_cost = 1;
        config.crypto.argon2_parallelism = 1;
        tweak(&mut config);
        std::fs::create_dir_all(&config.storage.staging_dir).unwrap();

        let faults = Faults::default();
        let store = shared(FlakyStore {
            inner: JsonStore::open(&config.storage.metadata_path).unwrap(),
            faults: faults.clone(),
        });
        let vault = Vault::new(&config, store.clone());
        let accounts = Accounts::new(store.clone(), fast_kdf());
        Self {
            dir,
            config,
            store,
            faults,
            vault,
            accounts,
        }
    }

    /// Admin `alice`, editor `bob`, viewer `carol`; returns their sessions.
    pub async fn three_users(&self) -> (Session, Session, Session) {
        self.accounts
            .create_user(None, "alice", &password("alice-pass"), None)
            .await
            .unwrap();
        let admin = self.login("alice").await;
        self.accounts
            .create_user(Some(&admin), "bob", &password("bob-pass1"), Some(Role::Editor))
            .await
            .unwrap();
        self.accounts
            .create_user(Some(&admin), "carol", &password("carol-pass"), Some(Role::Viewer))
            .await
            .unwrap();
        (admin, self.login("bob").await, self.login("carol").await)
    }

    pub async fn login(&self, name: &str) -> Session {
        let pw = match name {
            "alice" => "alice-pass",
            "bob" => "bob-pass1",
            "carol" => "carol-pass",
            other => panic!("no fixture password for {other}"),
        };
        self.accounts.login(name, &password(pw)).await.unwrap()
    }

    /// Drop a plaintext file into the staging directory.
    pub fn stage(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.config.storage.staging_dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn blob_path(&self, record: &FileRecord) -> PathBuf {
        self.config
            .storage
            .root
            .join("users")
            .join(record.user_id.to_string())
            .join(&record.filepath)
    }

    pub fn staging(&self) -> &Path {
        &self.config.storage.staging_dir
    }

    pub fn user_blob_dir(&self, user_id: UserId) -> PathBuf {
        self.config.storage.root.join("users").join(user_id.to_string())
    }
}

pub fn patterned(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
        .collect()
}
