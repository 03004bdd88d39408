use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Authentication failed: tampered, truncated, or wrong key/file id
    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    pub fn is_integrity(&self) -> bool {
        matches!(self, CryptoError::Integrity(_))
    }
}
