//! Metadata store: users, files and system_config rows.
//!
//! The default backend is a single JSON document held in memory and flushed
//! atomically (temp file + rename) after every mutation. Callers share one
//! store through [`SharedStore`], an explicitly passed
//! `Arc<tokio::sync::Mutex<_>>`; there is no global handle.
//!
//! File ids come from a persisted counter that only moves forward, so an id is
//! never handed out twice even if the row that used it is later deleted.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use vault_core::roles::Role;
use vault_core::types::{now_secs, ConfigEntry};
use vault_core::{FileId, FileRecord, UserId, UserRecord};

/// Storage interface for the three tables.
///
/// Every method can fail; callers map failures to `StorageBackend` and the
/// access gate treats them as a denial.
pub trait MetadataStore: Send {
    fn user(&self, id: UserId) -> Result<Option<UserRecord>>;
    fn user_by_name(&self, username: &str) -> Result<Option<UserRecord>>;
    fn users(&self) -> Result<Vec<UserRecord>>;
    fn allocate_user_id(&mut self) -> Result<UserId>;
    /// Fails if the id or the username is already taken.
    fn insert_user(&mut self, user: UserRecord) -> Result<()>;
    fn set_user_role(&mut self, id: UserId, role: Role) -> Result<bool>;

    /// Next file id from the strictly increasing counter.
    fn allocate_file_id(&mut self) -> Result<FileId>;
    fn file(&self, id: FileId) -> Result<Option<FileRecord>>;
    fn files(&self) -> Result<Vec<FileRecord>>;
    /// Fails if the id exists or the owner does not.
    fn insert_file(&mut self, file: FileRecord) -> Result<()>;
    fn update_file(&mut self, file: FileRecord) -> Result<bool>;
    fn remove_file(&mut self, id: FileId) -> Result<bool>;

    fn config_value(&self, key: &str) -> Result<Option<ConfigEntry>>;
    fn set_config_value(&mut self, key: &str, value: &str) -> Result<()>;

    fn files_for_user(&self, user_id: UserId) -> Result<Vec<FileRecord>> {
        Ok(self
            .files()?
            .into_iter()
            .filter(|f| f.user_id == user_id)
            .collect())
    }
}

/// The store handle every component receives.
pub type SharedStore = Arc<Mutex<dyn MetadataStore>>;

pub fn shared<S: MetadataStore + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    next_user_id: u64,
    #[serde(default)]
    next_file_id: u64,
    #[serde(default)]
    users: BTreeMap<UserId, UserRecord>,
    #[serde(default)]
    files: BTreeMap<FileId, FileRecord>,
    #[serde(default)]
    system_config: BTreeMap<String, ConfigEntry>,
}

impl Tables {
    /// Counters must sit above every id already present (imported data).
    fn fix_counters(&mut self) {
        let max_user = self.users.keys().next_back().copied().unwrap_or(0);
        let max_file = self.files.keys().next_back().copied().unwrap_or(0);
        self.next_user_id = self.next_user_id.max(max_user + 1);
        self.next_file_id = self.next_file_id.max(max_file + 1);
    }
}

/// JSON-file backend
pub struct JsonStore {
    path: PathBuf,
    tables: Tables,
    dirty: bool,
}

impl JsonStore {
    /// Load or create a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let mut tables: Tables = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading metadata store: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing metadata store: {}", path.display()))?
        } else {
            Tables::default()
        };
        tables.fix_counters();

        Ok(JsonStore {
            path: path.to_path_buf(),
            tables,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the tables out atomically (write temp, then rename).
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating metadata dir: {}", parent.display()))?;
        }

        let json =
            serde_json::to_string_pretty(&self.tables).context("serializing metadata store")?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)
            .with_context(|| format!("writing metadata temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming metadata store: {}", self.path.display()))?;

        self.dirty = false;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.dirty = true;
        self.flush()
    }
}

impl Drop for JsonStore {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                tracing::warn!("failed to flush metadata store on drop: {e}");
            }
        }
    }
}

impl MetadataStore for JsonStore {
    fn user(&self, id: UserId) -> Result<Option<UserRecord>> {
        Ok(self.tables.users.get(&id).cloned())
    }

    fn user_by_name(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    fn users(&self) -> Result<Vec<UserRecord>> {
        Ok(self.tables.users.values().cloned().collect())
    }

    fn allocate_user_id(&mut self) -> Result<UserId> {
        let id = self.tables.next_user_id;
        self.tables.next_user_id += 1;
        self.commit()?;
        Ok(id)
    }

    fn insert_user(&mut self, user: UserRecord) -> Result<()> {
        if self.tables.users.contains_key(&user.id) {
            bail!("user id {} already exists", user.id);
        }
        if self.tables.users.values().any(|u| u.username == user.username) {
            bail!("username '{}' already exists", user.username);
        }
        self.tables.next_user_id = self.tables.next_user_id.max(user.id + 1);
        self.tables.users.insert(user.id, user);
        self.commit()
    }

    fn set_user_role(&mut self, id: UserId, role: Role) -> Result<bool> {
        match self.tables.users.get_mut(&id) {
            Some(user) => {
                user.role = role;
                self.commit()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn allocate_file_id(&mut self) -> Result<FileId> {
        let id = self.tables.next_file_id;
        self.tables.next_file_id += 1;
        self.commit()?;
        Ok(id)
    }

    fn file(&self, id: FileId) -> Result<Option<FileRecord>> {
        Ok(self.tables.files.get(&id).cloned())
    }

    fn files(&self) -> Result<Vec<FileRecord>> {
        Ok(self.tables.files.values().cloned().collect())
    }

    fn insert_file(&mut self, file: FileRecord) -> Result<()> {
        if self.tables.files.contains_key(&file.id) {
            bail!("file id {} already exists", file.id);
        }
        if !self.tables.users.contains_key(&file.user_id) {
            bail!("file {} references unknown user {}", file.id, file.user_id);
        }
        self.tables.next_file_id = self.tables.next_file_id.max(file.id + 1);
        self.tables.files.insert(file.id, file);
        self.commit()
    }

    fn update_file(&mut self, file: FileRecord) -> Result<bool> {
        match self.tables.files.get_mut(&file.id) {
            Some(slot) => {
                *slot = file;
                self.commit()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_file(&mut self, id: FileId) -> Result<bool> {
        if self.tables.files.remove(&id).is_some() {
            self.commit()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn config_value(&self, key: &str) -> Result<Option<ConfigEntry>> {
        Ok(self.tables.system_config.get(key).cloned())
    }

    fn set_config_value(&mut self, key: &str, value: &str) -> Result<()> {
        self.tables.system_config.insert(
            key.to_string(),
            ConfigEntry {
                value: value.to_string(),
                updated_at: now_secs(),
            },
        );
        self.commit()
    }
}
