//! BLAKE3 content fingerprints
//!
//! The hash identifies plaintext content, never ciphertext, so two uploads of
//! the same bytes match even though their keys and IVs differ. Everything here
//! reads in fixed 64 KiB steps.

use anyhow::{Context, Result};
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// A BLAKE3 hash digest (32 bytes), displayed as 64 hex chars
pub type Hash = blake3::Hash;

const READ_BUF: usize = 64 * 1024;

/// Hash everything `reader` yields.
pub async fn hash_reader<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Hash> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Hash a file from disk using the streaming interface.
pub async fn hash_file(path: &Path) -> Result<Hash> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening file for streaming hash: {}", path.display()))?;
    hash_reader(&mut file)
        .await
        .with_context(|| format!("reading for hash: {}", path.display()))
}

/// Format a hash as lowercase hex string (64 chars)
pub fn hash_to_hex(hash: &Hash) -> String {
    hash.to_hex().to_string()
}

/// `AsyncWrite` adapter that hashes every byte on its way to `inner`.
///
/// Lets the decrypt pipeline feed a fingerprint without a second pass or a
/// temporary plaintext file.
pub struct HashingWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
    bytes: u64,
}

impl<W> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            bytes: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(&self) -> Hash {
        self.hasher.finalize()
    }
}

impl HashingWriter<tokio::io::Sink> {
    /// Hash only; discard the bytes.
    pub fn sink() -> Self {
        Self::new(tokio::io::sink())
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for HashingWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.hasher.update(&buf[..n]);
                this.bytes += n as u64;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reader_matches_one_shot_hash() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let h = hash_reader(&mut data.as_slice()).await.unwrap();
        assert_eq!(h, blake3::hash(&data));
    }

    #[tokio::test]
    async fn file_hash_matches_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello vault").unwrap();
        assert_eq!(hash_file(&path).await.unwrap(), blake3::hash(b"hello vault"));
    }

    #[tokio::test]
    async fn missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(hash_file(&dir.path().join("nope")).await.is_err());
    }

    #[tokio::test]
    async fn hashing_writer_passes_bytes_through() {
        let mut w = HashingWriter::new(Vec::new());
        w.write_all(b"abc").await.unwrap();
        w.write_all(b"def").await.unwrap();
        w.flush().await.unwrap();

        assert_eq!(w.bytes_written(), 6);
        assert_eq!(w.finalize(), blake3::hash(b"abcdef"));
        assert_eq!(w.inner, b"abcdef");
    }

    #[tokio::test]
    async fn sink_hashes_without_storing() {
        let mut w = HashingWriter::sink();
        w.write_all(b"payload").await.unwrap();
        assert_eq!(w.finalize(), blake3::hash(b"payload"));
    }

    #[test]
    fn hash_hex_is_lowercase_64_chars() {
        let h = blake3::hash(b"hello vault");
        let hex = hash_to_hex(&h);
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
