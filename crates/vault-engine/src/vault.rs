//! File lifecycle: upload, download, delete, trash, restore, listing.
//!
//! Per-file states: absent → uploading → active ⇄ trashed → purged.
//!
//! Ordering rules:
//!   - upload writes the blob first and persists the row last; any failure
//!     removes the partial blob and nothing is persisted
//!   - delete removes the blob first and the row second; a crash in between
//!     leaves an orphan row that `reconcile` drops, never a blob without a row
//!   - trash and restore touch metadata only

use std::path::Path;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};
use vault_core::config::{StorageConfig, VaultConfig};
use vault_core::types::{now_secs, UsageSummary};
use vault_core::{
    FileId, FileRecord, NotFoundKind, Permission, UserId, VaultError, VaultResult,
};
use vault_crypto::{
    decrypt_stream_with_key, encrypt_stream_with_key, AuthTag, FileKey, Iv, StreamStats,
};
use vault_storage::blob::remove_if_exists;
use vault_storage::{new_blob_name, BlobLayout, CapacityCheck, QuotaPolicy};

use crate::access::{AccessGate, Authorized};
use crate::error::{from_crypto, from_guard};
use crate::keying;
use crate::session::{Session, SessionSecret};
use crate::store::SharedStore;

/// Context string bound into the file key and every frame's AAD.
pub(crate) fn key_context(user_id: UserId, file_id: FileId) -> String {
    format!("{user_id}-{file_id}")
}

/// A plaintext file the upload transport has staged on disk.
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub temp_path: &'a Path,
    pub filename: &'a str,
    pub mimetype: &'a str,
    /// Declared size; the recorded size is what was actually read.
    pub size: u64,
}

/// Response metadata available before any body byte is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadHeaders {
    pub file_id: FileId,
    pub filename: String,
    pub size: u64,
    pub mimetype: String,
    pub encrypted: bool,
}

enum Body {
    Encrypted {
        key: FileKey,
        context: String,
        iv: Iv,
        tag: AuthTag,
        chunk_size: usize,
    },
    Plain,
}

/// An authorized download whose body has not been streamed yet.
pub struct Download {
    headers: DownloadHeaders,
    file: File,
    body: Body,
}

impl Download {
    pub fn headers(&self) -> &DownloadHeaders {
        &self.headers
    }

    /// Stream the plaintext into `sink`.
    ///
    /// Headers are already committed when this runs. An integrity failure
    /// here means the receiver got a truncated body; it is logged and
    /// returned so the transport can abort the response.
    pub async fn stream_to<W: AsyncWrite + Unpin>(mut self, sink: &mut W) -> VaultResult<StreamStats> {
        let file_id = self.headers.file_id;
        match self.body {
            Body::Encrypted {
                key,
                context,
                iv,
                tag,
                chunk_size,
            } => {
                match decrypt_stream_with_key(&mut self.file, sink, &key, &context, &iv, &tag, chunk_size)
                    .await
                {
                    Ok(stats) => {
                        if stats.bytes_out != self.headers.size {
                            warn!(
                                file_id,
                                recorded = self.headers.size,
                                actual = stats.bytes_out,
                                "decrypted size differs from recorded size"
                            );
                        }
                        debug!(file_id, bytes = stats.bytes_out, "download complete");
                        Ok(stats)
                    }
                    Err(e) => {
                        if e.is_integrity() {
                            error!(
                                file_id,
                                "integrity failure after headers were sent, transfer truncated: {e}"
                            );
                        }
                        Err(from_crypto(e))
                    }
                }
            }
            Body::Plain => {
                let copied = tokio::io::copy(&mut self.file, sink).await?;
                sink.flush().await?;
                debug!(file_id, bytes = copied, "legacy download complete");
                Ok(StreamStats {
                    bytes_in: copied,
                    bytes_out: copied,
                    frames: 0,
                    peak_buffer_bytes: 0,
                })
            }
        }
    }
}

/// The file lifecycle manager.
pub struct Vault {
    pub(crate) store: SharedStore,
    pub(crate) gate: AccessGate,
    pub(crate) layout: BlobLayout,
    pub(crate) storage: StorageConfig,
    /// Frame size for new uploads; existing blobs use their recorded size
    pub(crate) chunk_size: usize,
    pub(crate) trash_window_secs: u64,
    pub(crate) stale_after_secs: u64,
    quota: Arc<dyn CapacityCheck>,
}

impl Vault {
    pub fn new(config: &VaultConfig, store: SharedStore) -> Self {
        Self {
            gate: AccessGate::new(store.clone()),
            store,
            layout: BlobLayout::from_config(&config.storage),
            storage: config.storage.clone(),
            chunk_size: config.crypto.chunk_size,
            trash_window_secs: config.retention.window_secs(),
            stale_after_secs: config.retention.stale_after_secs,
            quota: Arc::new(QuotaPolicy::from_config(&config.storage)),
        }
    }

    /// Replace the default quota policy.
    pub fn with_capacity_check(mut self, check: Arc<dyn CapacityCheck>) -> Self {
        self.quota = check;
        self
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn layout(&self) -> &BlobLayout {
        &self.layout
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Encrypt a staged upload into the vault.
    ///
    /// The temp file is removed whether or not the upload succeeds, provided
    /// it lies inside the staging directory. Paths outside staging are
    /// rejected and never touched.
    pub async fn upload(
        &self,
        session: Option<&Session>,
        req: UploadRequest<'_>,
    ) -> VaultResult<FileRecord> {
        let temp_path = self
            .layout
            .check_staged(req.temp_path)
            .map_err(from_guard)?;

        let result = self.upload_staged(session, &req, &temp_path).await;

        if let Err(e) = remove_if_exists(&temp_path).await {
            warn!(path = %temp_path.display(), "failed to remove staged upload: {e}");
        }
        result
    }

    async fn upload_staged(
        &self,
        session: Option<&Session>,
        req: &UploadRequest<'_>,
        temp_path: &Path,
    ) -> VaultResult<FileRecord> {
        let auth = self.gate.require(session, Permission::FileUpload).await?;
        let secret = session
            .and_then(Session::secret)
            .ok_or(VaultError::AuthenticationRequired)?;

        if req.filename.trim().is_empty() {
            return Err(VaultError::Validation("filename is empty".into()));
        }
        if !self.storage.is_allowed_mime(req.mimetype) {
            return Err(VaultError::Validation(format!(
                "file type '{}' is not allowed",
                req.mimetype
            )));
        }

        let staged_len = tokio::fs::metadata(temp_path).await?.len();
        if staged_len != req.size {
            debug!(declared = req.size, staged = staged_len, "declared size differs from staged file");
        }
        let used = self.stored_bytes().await?;
        let decision = self.quota.check(used, staged_len);
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_else(|| "capacity check failed".into());
            info!(user_id = auth.user_id, "upload refused: {reason}");
            return Err(VaultError::CapacityExceeded(reason));
        }

        let file_id = self.store.lock().await.allocate_file_id()?;
        self.layout.ensure_user_dir(auth.user_id).await?;
        let blob_name = new_blob_name();
        let blob_path = self
            .layout
            .resolve(auth.user_id, &blob_name)
            .map_err(from_guard)?;

        let written = self
            .encrypt_to_blob(&auth, secret, file_id, temp_path, &blob_path)
            .await;
        let (iv, tag, stats) = match written {
            Ok(v) => v,
            Err(e) => {
                warn!(file_id, user_id = auth.user_id, "upload failed, removing partial blob: {e}");
                if let Err(rm) = remove_if_exists(&blob_path).await {
                    error!(path = %blob_path.display(), "failed to remove partial blob: {rm}");
                }
                return Err(e);
            }
        };

        let record = FileRecord {
            id: file_id,
            user_id: auth.user_id,
            filename: req.filename.to_string(),
            filepath: blob_name,
            size: stats.bytes_in,
            mimetype: req.mimetype.to_string(),
            uploaded_at: now_secs(),
            iv: Some(iv.to_base64()),
            auth_tag: Some(tag.to_base64()),
            encrypted: true,
            trashed_at: None,
            file_hash: None,
            chunk_size: Some(self.chunk_size),
        };

        let persisted = self.store.lock().await.insert_file(record.clone());
        if let Err(e) = persisted {
            error!(file_id, "persisting file row failed, removing blob: {e:#}");
            if let Err(rm) = remove_if_exists(&blob_path).await {
                error!(path = %blob_path.display(), "failed to remove unreferenced blob: {rm}");
            }
            return Err(e.into());
        }

        info!(
            file_id,
            user_id = auth.user_id,
            size = record.size,
            frames = stats.frames,
            "file uploaded"
        );
        Ok(record)
    }

    async fn encrypt_to_blob(
        &self,
        auth: &Authorized,
        secret: &SessionSecret,
        file_id: FileId,
        temp_path: &Path,
        blob_path: &Path,
    ) -> VaultResult<(Iv, AuthTag, StreamStats)> {
        let context = key_context(auth.user_id, file_id);
        let key = keying::file_key(secret, &context).await?;

        let mut src = File::open(temp_path).await?;
        let mut dst = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(blob_path)
            .await?;

        let outcome = encrypt_stream_with_key(&mut src, &mut dst, &key, &context, self.chunk_size)
            .await
            .map_err(from_crypto)?;
        dst.sync_all().await?;

        Ok((outcome.iv, outcome.auth_tag, outcome.stats))
    }

    /// Authorize a download and prepare its body.
    ///
    /// Key derivation and the blob open happen here, so every failure except
    /// a late integrity mismatch surfaces before headers go out.
    pub async fn download(&self, session: Option<&Session>, file_id: FileId) -> VaultResult<Download> {
        let auth = self.gate.require(session, Permission::FileDownload).await?;
        let record = self.owned_file(auth.user_id, file_id).await?;
        record.check_crypto_fields()?;

        let path = self
            .layout
            .resolve(record.user_id, &record.filepath)
            .map_err(from_guard)?;
        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(file_id, path = %path.display(), "row present but blob missing");
                return Err(VaultError::NotFound(NotFoundKind::Disk));
            }
            Err(e) => return Err(e.into()),
        };

        let body = if record.encrypted {
            let secret = session
                .and_then(Session::secret)
                .ok_or(VaultError::AuthenticationRequired)?;
            let (Some(iv), Some(tag)) = (&record.iv, &record.auth_tag) else {
                return Err(VaultError::Integrity(format!("file {file_id} has no iv/auth_tag")));
            };
            let iv = Iv::from_base64(iv).map_err(from_crypto)?;
            let tag = AuthTag::from_base64(tag).map_err(from_crypto)?;
            let context = key_context(record.user_id, record.id);
            let key = keying::file_key(secret, &context).await?;
            Body::Encrypted {
                key,
                context,
                iv,
                tag,
                chunk_size: record.chunk_size.unwrap_or(self.chunk_size),
            }
        } else {
            Body::Plain
        };

        debug!(file_id, user_id = auth.user_id, "download authorized");
        Ok(Download {
            headers: DownloadHeaders {
                file_id: record.id,
                filename: record.filename,
                size: record.size,
                mimetype: record.mimetype,
                encrypted: record.encrypted,
            },
            file,
            body,
        })
    }

    /// Permanently delete one of the caller's files: blob first, then row.
    pub async fn delete(&self, session: Option<&Session>, file_id: FileId) -> VaultResult<()> {
        let auth = self.gate.require(session, Permission::FileDelete).await?;
        let record = self.owned_file(auth.user_id, file_id).await?;

        let path = self
            .layout
            .resolve(record.user_id, &record.filepath)
            .map_err(from_guard)?;
        if !tokio::fs::try_exists(&path).await? {
            warn!(file_id, path = %path.display(), "delete: blob missing, leaving row for reconcile");
            return Err(VaultError::NotFound(NotFoundKind::Disk));
        }

        tokio::fs::remove_file(&path).await?;
        debug!(file_id, "blob removed");

        let removed = self.store.lock().await.remove_file(file_id);
        if let Err(e) = removed {
            error!(file_id, "blob deleted but row removal failed; reconcile will drop it: {e:#}");
            return Err(e.into());
        }

        info!(file_id, user_id = auth.user_id, "file deleted");
        Ok(())
    }

    /// Move a file to the trash. Already-trashed files are left as they are.
    pub async fn trash(&self, session: Option<&Session>, file_id: FileId) -> VaultResult<FileRecord> {
        let auth = self.gate.require(session, Permission::FileTrash).await?;
        let mut record = self.owned_file(auth.user_id, file_id).await?;
        if record.is_trashed() {
            return Ok(record);
        }
        record.trashed_at = Some(now_secs());
        self.update_row(&record).await?;
        info!(file_id, user_id = auth.user_id, "file trashed");
        Ok(record)
    }

    /// Bring a trashed file back to the active list.
    pub async fn restore(&self, session: Option<&Session>, file_id: FileId) -> VaultResult<FileRecord> {
        let auth = self.gate.require(session, Permission::FileRestore).await?;
        let mut record = self.owned_file(auth.user_id, file_id).await?;
        if !record.is_trashed() {
            return Ok(record);
        }
        record.trashed_at = None;
        self.update_row(&record).await?;
        info!(file_id, user_id = auth.user_id, "file restored");
        Ok(record)
    }

    /// Caller's active files, newest first.
    pub async fn list_for_user(&self, session: Option<&Session>) -> VaultResult<Vec<FileRecord>> {
        let auth = self.gate.require(session, Permission::FileView).await?;
        let mut files: Vec<FileRecord> = self
            .store
            .lock()
            .await
            .files_for_user(auth.user_id)?
            .into_iter()
            .filter(|f| !f.is_trashed())
            .collect();
        files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then(b.id.cmp(&a.id)));
        Ok(files)
    }

    /// Caller's trashed files, most recently trashed first.
    pub async fn list_trash(&self, session: Option<&Session>) -> VaultResult<Vec<FileRecord>> {
        let auth = self.gate.require(session, Permission::FileView).await?;
        let mut files: Vec<FileRecord> = self
            .store
            .lock()
            .await
            .files_for_user(auth.user_id)?
            .into_iter()
            .filter(FileRecord::is_trashed)
            .collect();
        files.sort_by(|a, b| b.trashed_at.cmp(&a.trashed_at).then(b.id.cmp(&a.id)));
        Ok(files)
    }

    /// File counts and stored bytes for the caller.
    pub async fn usage(&self, session: Option<&Session>) -> VaultResult<UsageSummary> {
        let auth = self.gate.require(session, Permission::FileView).await?;
        let files = self.store.lock().await.files_for_user(auth.user_id)?;
        Ok(files.iter().fold(UsageSummary::default(), |mut acc, f| {
            acc.total_files += 1;
            acc.total_bytes += f.size;
            if f.encrypted {
                acc.encrypted_files += 1;
            }
            if f.is_trashed() {
                acc.trashed_files += 1;
            }
            acc
        }))
    }

    /// Bytes stored across all users, trashed files included.
    async fn stored_bytes(&self) -> VaultResult<u64> {
        let files = self.store.lock().await.files()?;
        Ok(files.iter().map(|f| f.size).sum())
    }

    /// The row for `file_id` if the caller owns it. Someone else's file is
    /// reported exactly like a missing one.
    pub(crate) async fn owned_file(&self, user_id: UserId, file_id: FileId) -> VaultResult<FileRecord> {
        let row = self.store.lock().await.file(file_id)?;
        match row {
            Some(f) if f.user_id == user_id => Ok(f),
            Some(_) => {
                debug!(file_id, user_id, "file belongs to another user");
                Err(VaultError::NotFound(NotFoundKind::Metadata))
            }
            None => Err(VaultError::NotFound(NotFoundKind::Metadata)),
        }
    }

    pub(crate) async fn update_row(&self, record: &FileRecord) -> VaultResult<()> {
        let updated = self.store.lock().await.update_file(record.clone())?;
        if !updated {
            return Err(VaultError::NotFound(NotFoundKind::Metadata));
        }
        Ok(())
    }
}
