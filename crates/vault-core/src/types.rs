use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::VaultError;
use crate::roles::Role;

pub type UserId = u64;
pub type FileId = u64;

/// Argon2id cost parameters, recorded per user at account creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfSettings {
    pub mem_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

/// A row in `users`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    /// Argon2id PHC string, never the plaintext password
    pub password_credential: String,
    /// 16 random bytes, base64; immutable after creation
    pub encryption_salt: String,
    #[serde(default)]
    pub role: Role,
    pub created_at: u64,
    /// Parameters every master key of this user is derived with.
    /// Absent on rows that predate the column; those use the configured ones.
    #[serde(default)]
    pub kdf: Option<KdfSettings>,
}

/// A row in `files`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub user_id: UserId,
    /// Original, human-facing filename. Never used as a disk path.
    pub filename: String,
    /// Opaque on-disk name relative to the owner's storage directory
    pub filepath: String,
    /// Plaintext size in bytes
    pub size: u64,
    pub mimetype: String,
    pub uploaded_at: u64,
    /// base64 per-file IV (None only for legacy plaintext files)
    pub iv: Option<String>,
    /// base64 file-level authentication tag
    pub auth_tag: Option<String>,
    pub encrypted: bool,
    #[serde(default)]
    pub trashed_at: Option<u64>,
    /// BLAKE3 hex of the plaintext, filled in by the hash backfill
    #[serde(default)]
    pub file_hash: Option<String>,
    /// Plaintext bytes per frame the blob was encrypted with
    #[serde(default)]
    pub chunk_size: Option<usize>,
}

impl FileRecord {
    pub fn is_trashed(&self) -> bool {
        self.trashed_at.is_some()
    }

    /// Encrypted rows must carry both IV and tag.
    pub fn check_crypto_fields(&self) -> Result<(), VaultError> {
        if self.encrypted && (self.iv.is_none() || self.auth_tag.is_none()) {
            return Err(VaultError::Validation(format!(
                "file {} is marked encrypted but has no iv/auth_tag",
                self.id
            )));
        }
        Ok(())
    }
}

/// A row in `system_config`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub value: String,
    pub updated_at: u64,
}

/// Resource kinds the ownership check understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    File,
    Folder,
    Comment,
}

impl FromStr for ResourceType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(ResourceType::File),
            "folder" => Ok(ResourceType::Folder),
            "comment" => Ok(ResourceType::Comment),
            other => Err(VaultError::Validation(format!(
                "invalid resource type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceType::File => "file",
            ResourceType::Folder => "folder",
            ResourceType::Comment => "comment",
        })
    }
}

/// A set of files sharing one content hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub hash: String,
    pub files: Vec<DuplicateMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMember {
    pub id: FileId,
    pub user_id: UserId,
    pub filename: String,
    pub filepath: String,
    pub size: u64,
}

impl From<&FileRecord> for DuplicateMember {
    fn from(f: &FileRecord) -> Self {
        Self {
            id: f.id,
            user_id: f.user_id,
            filename: f.filename.clone(),
            filepath: f.filepath.clone(),
            size: f.size,
        }
    }
}

/// Per-user storage summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_files: usize,
    pub encrypted_files: usize,
    pub trashed_files: usize,
    pub total_bytes: u64,
}

/// Current Unix time in seconds
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
