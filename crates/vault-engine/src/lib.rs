//! vault-engine: the pocketvault storage engine
//!
//! - `store`: metadata tables behind an explicitly shared handle
//! - `session`: authenticated identity plus in-memory secret material
//! - `accounts`: user creation, login, role changes
//! - `keying`: Argon2id parameters and blocking-pool key derivation
//! - `access`: permission and ownership checks, failing closed
//! - `vault`: upload/download/delete/trash/restore/listing
//! - `retention`: purge of files trashed past the retention window
//! - `reconcile`: repair of disk/metadata drift
//! - `duplicates`: content-hash backfill and duplicate grouping

pub mod access;
pub mod accounts;
pub mod duplicates;
mod error;
pub mod keying;
pub mod reconcile;
pub mod retention;
pub mod session;
pub mod store;
pub mod vault;

pub use access::{AccessGate, Authorized};
pub use accounts::{Accounts, SETUP_COMPLETED_KEY};
pub use duplicates::{BackfillReport, DuplicateScope};
pub use keying::kdf_params;
pub use reconcile::ReconcileReport;
pub use retention::PurgeReport;
pub use session::{Session, SessionSecret};
pub use store::{shared, JsonStore, MetadataStore, SharedStore};
pub use vault::{Download, DownloadHeaders, UploadRequest, Vault};
