//! Per-file key derivation: master key → file key → tag key

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::kdf::MasterKey;
use crate::KEY_SIZE;

const FILE_KEY_DOMAIN: &[u8] = b"pocketvault-file:";
const TAG_KEY_DOMAIN: &[u8] = b"pocketvault-tag";

/// A per-file 256-bit encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct FileKey {
    bytes: [u8; KEY_SIZE],
}

impl FileKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for FileKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the key for one file. Binding `file_id` into the HKDF info means
/// two files of the same user never share a key.
pub fn derive_file_key(master: &MasterKey, file_id: &str) -> Result<FileKey, CryptoError> {
    if file_id.is_empty() {
        return Err(CryptoError::InvalidInput("empty file id".into()));
    }
    let mut info = Vec::with_capacity(FILE_KEY_DOMAIN.len() + file_id.len());
    info.extend_from_slice(FILE_KEY_DOMAIN);
    info.extend_from_slice(file_id.as_bytes());
    hkdf_derive(master.as_bytes(), &info).map(FileKey::from_bytes)
}

/// Key for the keyed-BLAKE3 file tag, separate from the AEAD key.
pub(crate) fn derive_tag_key(file_key: &FileKey) -> Result<[u8; KEY_SIZE], CryptoError> {
    hkdf_derive(file_key.as_bytes(), TAG_KEY_DOMAIN)
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
fn hkdf_derive(ikm: &[u8; KEY_SIZE], info: &[u8]) -> Result<[u8; KEY_SIZE], CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(info, &mut okm)
        .map_err(|e| CryptoError::Kdf(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_master_key() -> MasterKey {
        MasterKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_file_key_deterministic() {
        let master = test_master_key();
        let k1 = derive_file_key(&master, "1-7").unwrap();
        let k2 = derive_file_key(&master, "1-7").unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_file_keys_differ_per_file() {
        let master = test_master_key();
        let k1 = derive_file_key(&master, "1-7").unwrap();
        let k2 = derive_file_key(&master, "1-8").unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_file_keys_differ_per_master() {
        let k1 = derive_file_key(&MasterKey::from_bytes([1u8; KEY_SIZE]), "1-7").unwrap();
        let k2 = derive_file_key(&MasterKey::from_bytes([2u8; KEY_SIZE]), "1-7").unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_tag_key_separate_from_file_key() {
        let fk = derive_file_key(&test_master_key(), "1-1").unwrap();
        let tk = derive_tag_key(&fk).unwrap();
        assert_ne!(fk.as_bytes(), &tk);
    }

    #[test]
    fn test_empty_file_id_rejected() {
        assert!(derive_file_key(&test_master_key(), "").is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let fk = derive_file_key(&test_master_key(), "1-1").unwrap();
        assert!(format!("{fk:?}").contains("REDACTED"));
    }
}
