//! Streaming encrypt/decrypt over `AsyncRead` → `AsyncWrite`
//!
//! Memory use is one frame buffer (`chunk_size + TAG_SIZE`) regardless of
//! input size. Each frame is authenticated before its plaintext is written
//! out; the file-level tag (keyed BLAKE3 over the IV, every frame tag and the
//! frame count) can only be checked once the whole stream has been read.
//! If that final check fails, earlier frames have already reached the sink.
//! Callers streaming to a remote peer must treat that as a truncated
//! delivery. The pipeline never deletes partial output.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use secrecy::SecretString;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::chunk::FrameCipher;
use crate::error::CryptoError;
use crate::kdf::{derive_master_key, KdfParams};
use crate::keys::{derive_file_key, derive_tag_key, FileKey};
use crate::{DEFAULT_CHUNK_SIZE, FILE_TAG_SIZE, IV_SIZE, SALT_SIZE, TAG_SIZE};

/// Random per-file initialization vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iv([u8; IV_SIZE]);

impl Iv {
    pub fn random() -> Self {
        let mut bytes = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; IV_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        decode_fixed(s, "iv").map(Self)
    }
}

/// File-level authentication tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthTag([u8; FILE_TAG_SIZE]);

impl AuthTag {
    pub fn from_bytes(bytes: [u8; FILE_TAG_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FILE_TAG_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        decode_fixed(s, "auth tag").map(Self)
    }

    /// Constant-time comparison (via `blake3::Hash` equality).
    fn matches(&self, other: &AuthTag) -> bool {
        blake3::Hash::from(self.0) == blake3::Hash::from(other.0)
    }
}

fn decode_fixed<const N: usize>(s: &str, what: &str) -> Result<[u8; N], CryptoError> {
    let bytes = STANDARD
        .decode(s)
        .map_err(|e| CryptoError::InvalidInput(format!("{what} is not valid base64: {e}")))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        CryptoError::InvalidInput(format!("{what} has {} bytes, expected {N}", v.len()))
    })
}

/// Knobs shared by encrypt and decrypt. Both sides must agree on `chunk_size`.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub kdf: KdfParams,
    pub chunk_size: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Counters for one pass through the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub frames: u64,
    /// Capacity of the single working buffer; the pipeline allocates nothing per frame
    pub peak_buffer_bytes: usize,
}

/// What the caller must persist next to the blob
#[derive(Debug, Clone)]
pub struct EncryptOutcome {
    pub iv: Iv,
    pub auth_tag: AuthTag,
    pub stats: StreamStats,
}

/// Keyed BLAKE3 over the IV, each frame tag, and the frame count.
struct FileMac {
    hasher: blake3::Hasher,
}

impl FileMac {
    fn new(file_key: &FileKey, iv: &Iv) -> Result<Self, CryptoError> {
        let key = derive_tag_key(file_key)?;
        let mut hasher = blake3::Hasher::new_keyed(&key);
        hasher.update(iv.as_bytes());
        Ok(Self { hasher })
    }

    fn update(&mut self, frame_tag: &[u8; TAG_SIZE]) {
        self.hasher.update(frame_tag);
    }

    fn finalize(mut self, frames: u64) -> AuthTag {
        self.hasher.update(&frames.to_be_bytes());
        AuthTag(*self.hasher.finalize().as_bytes())
    }
}

fn file_key_for(
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    file_id: &str,
    kdf: &KdfParams,
) -> Result<FileKey, CryptoError> {
    let master = derive_master_key(password, salt, kdf)?;
    derive_file_key(&master, file_id)
}

fn check_chunk_size(chunk_size: usize) -> Result<(), CryptoError> {
    if chunk_size == 0 {
        return Err(CryptoError::InvalidInput("chunk_size must be > 0".into()));
    }
    Ok(())
}

/// Fill `buf` from `reader`, stopping early only at EOF.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Derive the file key from `(password, salt, file_id)` and encrypt `reader` into `writer`.
pub async fn encrypt_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    file_id: &str,
    opts: &StreamOptions,
) -> Result<EncryptOutcome, CryptoError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let key = file_key_for(password, salt, file_id, &opts.kdf)?;
    encrypt_stream_with_key(reader, writer, &key, file_id, opts.chunk_size).await
}

/// Encrypt with an already-derived file key.
pub async fn encrypt_stream_with_key<R, W>(
    reader: &mut R,
    writer: &mut W,
    file_key: &FileKey,
    file_id: &str,
    chunk_size: usize,
) -> Result<EncryptOutcome, CryptoError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    check_chunk_size(chunk_size)?;

    let iv = Iv::random();
    let cipher = FrameCipher::new(file_key, iv.as_bytes(), file_id);
    let mut mac = FileMac::new(file_key, &iv)?;
    let mut buf = vec![0u8; chunk_size];
    let mut stats = StreamStats {
        peak_buffer_bytes: buf.capacity(),
        ..Default::default()
    };

    let mut index = 0u64;
    loop {
        let n = read_full(reader, &mut buf).await?;
        // A short read (including zero bytes) closes the stream.
        let is_final = n < chunk_size;

        let tag = cipher.seal_in_place(index, is_final, &mut buf[..n])?;
        mac.update(&tag);
        writer.write_all(&buf[..n]).await?;
        writer.write_all(&tag).await?;

        stats.bytes_in += n as u64;
        stats.bytes_out += (n + TAG_SIZE) as u64;
        index += 1;

        if is_final {
            break;
        }
    }
    writer.flush().await?;

    stats.frames = index;
    debug!(
        file_id,
        frames = stats.frames,
        bytes = stats.bytes_in,
        "stream encrypted"
    );

    Ok(EncryptOutcome {
        iv,
        auth_tag: mac.finalize(index),
        stats,
    })
}

/// Derive the file key from `(password, salt, file_id)` and decrypt `reader` into `writer`.
///
/// Fails with [`CryptoError::Integrity`] on any frame or file-tag mismatch.
#[allow(clippy::too_many_arguments)]
pub async fn decrypt_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    file_id: &str,
    iv: &Iv,
    expected_tag: &AuthTag,
    opts: &StreamOptions,
) -> Result<StreamStats, CryptoError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let key = file_key_for(password, salt, file_id, &opts.kdf)?;
    decrypt_stream_with_key(reader, writer, &key, file_id, iv, expected_tag, opts.chunk_size).await
}

/// Decrypt with an already-derived file key.
pub async fn decrypt_stream_with_key<R, W>(
    reader: &mut R,
    writer: &mut W,
    file_key: &FileKey,
    file_id: &str,
    iv: &Iv,
    expected_tag: &AuthTag,
    chunk_size: usize,
) -> Result<StreamStats, CryptoError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    check_chunk_size(chunk_size)?;

    let frame_size = chunk_size + TAG_SIZE;
    let cipher = FrameCipher::new(file_key, iv.as_bytes(), file_id);
    let mut mac = FileMac::new(file_key, iv)?;
    let mut buf = vec![0u8; frame_size];
    let mut stats = StreamStats {
        peak_buffer_bytes: buf.capacity(),
        ..Default::default()
    };

    let mut index = 0u64;
    loop {
        let n = read_full(reader, &mut buf).await?;
        let is_final = n < frame_size;
        if n < TAG_SIZE {
            return Err(CryptoError::Integrity(format!(
                "stream truncated at frame {index} ({n} trailing bytes)"
            )));
        }

        let (body, tag_bytes) = buf[..n].split_at_mut(n - TAG_SIZE);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(tag_bytes);

        cipher.open_in_place(index, is_final, body, &tag)?;
        mac.update(&tag);
        writer.write_all(body).await?;

        stats.bytes_in += n as u64;
        stats.bytes_out += body.len() as u64;
        index += 1;

        if is_final {
            break;
        }
    }
    writer.flush().await?;
    stats.frames = index;

    let actual = mac.finalize(index);
    if !actual.matches(expected_tag) {
        warn!(file_id, frames = index, "file tag mismatch after full stream");
        return Err(CryptoError::Integrity(
            "file authentication tag does not match".into(),
        ));
    }

    debug!(file_id, frames = index, bytes = stats.bytes_out, "stream decrypted");
    Ok(stats)
}
