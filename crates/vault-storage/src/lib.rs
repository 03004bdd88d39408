//! vault-storage: where encrypted bytes live and how they are reached safely
//!
//! - `guard`: reject any path that resolves outside a trusted base directory
//! - `blob`: per-user blob directories, opaque `.enc` names, guarded resolution
//! - `fingerprint`: streamed BLAKE3 content hashing for duplicate detection
//! - `quota`: capacity decision consulted before every upload

pub mod blob;
pub mod fingerprint;
pub mod guard;
pub mod quota;

pub use blob::{check_health, new_blob_name, BlobLayout};
pub use fingerprint::{hash_file, hash_reader, hash_to_hex, HashingWriter};
pub use guard::{ensure_inside, join_inside, GuardError};
pub use quota::{CapacityCheck, CapacityDecision, QuotaPolicy};
