//! vault-core: shared types for pocketvault
//!
//! - `config`: `vault.toml` schema
//! - `error`: the `VaultError` taxonomy surfaced to callers
//! - `roles`: the fixed role → permission matrix
//! - `types`: persisted rows (users, files, system config) and ids

pub mod config;
pub mod error;
pub mod roles;
pub mod types;

pub use error::{ErrorResponse, NotFoundKind, VaultError, VaultResult};
pub use roles::{Permission, Role};
pub use types::{FileId, FileRecord, KdfSettings, ResourceType, UserId, UserRecord};
