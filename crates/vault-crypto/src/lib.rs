//! vault-crypto: encryption at rest for pocketvault
//!
//! Key hierarchy:
//! ```text
//! password + per-user salt
//!   └── Master Key (256-bit, Argon2id)
//!         └── File Key (HKDF-SHA256, info = "pocketvault-file:" || file_id)
//!               ├── Frame AEAD: XChaCha20-Poly1305
//!               │     nonce = iv (16) || chunk_index (8, BE)
//!               │     AAD   = chunk_index || final_flag || file_id
//!               └── Tag Key (HKDF, info = "pocketvault-tag") → keyed BLAKE3 file tag
//! ```
//!
//! Blob layout is a plain sequence of frames, `ciphertext || 16-byte tag`.
//! Every frame but the last holds exactly `chunk_size` plaintext bytes; the
//! last is short (possibly empty) and flagged final in its AAD, so truncation
//! at a frame boundary is detected.

pub mod chunk;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod stream;

pub use error::CryptoError;
pub use kdf::{
    derive_master_key, generate_salt, hash_password, verify_password, KdfParams, MasterKey,
};
pub use keys::{derive_file_key, FileKey};
pub use stream::{
    decrypt_stream, decrypt_stream_with_key, encrypt_stream, encrypt_stream_with_key, AuthTag,
    EncryptOutcome, Iv, StreamOptions, StreamStats,
};

/// Size of a derived key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of the random per-file IV; the remaining nonce bytes carry the chunk index
pub const IV_SIZE: usize = 16;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the per-user KDF salt
pub const SALT_SIZE: usize = 16;

/// Size of the file-level authentication tag (BLAKE3 output)
pub const FILE_TAG_SIZE: usize = 32;

/// Default plaintext bytes per frame
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
