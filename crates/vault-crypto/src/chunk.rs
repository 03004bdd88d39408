//! Per-frame XChaCha20-Poly1305 encryption/decryption
//!
//! Frame format (binary):
//! ```text
//! [N bytes: ciphertext][16 bytes: Poly1305 tag]
//! nonce = iv (16 bytes) || chunk_index (8 bytes, big-endian)
//! AAD   = chunk_index (8 bytes, BE) || final_flag (1 byte) || file_id
//! ```
//!
//! The AAD binds each frame to its position, to the end of the stream, and to
//! the file, preventing reordering, truncation and cross-file substitution.
//! Sealing and opening work in place so the pipeline holds one buffer.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    Tag, XChaCha20Poly1305, XNonce,
};

use crate::error::CryptoError;
use crate::keys::FileKey;
use crate::{IV_SIZE, NONCE_SIZE, TAG_SIZE};

/// AEAD state for one file: key, IV and file id are fixed; frames vary by index.
pub struct FrameCipher {
    cipher: XChaCha20Poly1305,
    iv: [u8; IV_SIZE],
    file_id: Vec<u8>,
}

impl FrameCipher {
    pub fn new(file_key: &FileKey, iv: &[u8; IV_SIZE], file_id: &str) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(file_key.as_bytes().into()),
            iv: *iv,
            file_id: file_id.as_bytes().to_vec(),
        }
    }

    /// Encrypt `buf` in place and return the detached tag.
    pub fn seal_in_place(
        &self,
        chunk_index: u64,
        is_final: bool,
        buf: &mut [u8],
    ) -> Result<[u8; TAG_SIZE], CryptoError> {
        let nonce = self.nonce(chunk_index);
        let aad = build_aad(chunk_index, is_final, &self.file_id);
        let tag = self
            .cipher
            .encrypt_in_place_detached(&nonce, &aad, buf)
            .map_err(|e| CryptoError::InvalidInput(format!("frame encryption failed: {e}")))?;

        let mut out = [0u8; TAG_SIZE];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    /// Verify and decrypt `buf` in place. On failure `buf` must not be used.
    pub fn open_in_place(
        &self,
        chunk_index: u64,
        is_final: bool,
        buf: &mut [u8],
        tag: &[u8; TAG_SIZE],
    ) -> Result<(), CryptoError> {
        let nonce = self.nonce(chunk_index);
        let aad = build_aad(chunk_index, is_final, &self.file_id);
        self.cipher
            .decrypt_in_place_detached(&nonce, &aad, buf, Tag::from_slice(tag))
            .map_err(|_| {
                CryptoError::Integrity(format!(
                    "frame {chunk_index} failed authentication: wrong key, corrupted data, or truncated stream"
                ))
            })
    }

    fn nonce(&self, chunk_index: u64) -> XNonce {
        let mut bytes = [0u8; NONCE_SIZE];
        bytes[..IV_SIZE].copy_from_slice(&self.iv);
        bytes[IV_SIZE..].copy_from_slice(&chunk_index.to_be_bytes());
        *XNonce::from_slice(&bytes)
    }
}

/// Build AAD: chunk_index (8 bytes BE) || final_flag || file_id
fn build_aad(chunk_index: u64, is_final: bool, file_id: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(8 + 1 + file_id.len());
    aad.extend_from_slice(&chunk_index.to_be_bytes());
    aad.push(u8::from(is_final));
    aad.extend_from_slice(file_id);
    aad
}
