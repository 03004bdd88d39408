//! On-disk blob layout: `<root>/users/<user_id>/<uuid>.enc`
//!
//! Stored filenames come from the metadata store and are treated as untrusted:
//! every resolution goes through the path guard.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;
use vault_core::config::StorageConfig;
use vault_core::UserId;

use crate::guard::{ensure_inside, join_inside, GuardError};

/// Marker carried by every encrypted blob name
pub const BLOB_EXTENSION: &str = "enc";

/// Fresh opaque blob name; never derived from the user's filename.
pub fn new_blob_name() -> String {
    format!("{}.{BLOB_EXTENSION}", uuid::Uuid::new_v4())
}

pub fn is_blob_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext == BLOB_EXTENSION)
}

/// Directory layout rooted at the configured storage root.
#[derive(Debug, Clone)]
pub struct BlobLayout {
    root: PathBuf,
    staging: PathBuf,
}

impl BlobLayout {
    pub fn new(root: impl Into<PathBuf>, staging: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            staging: staging.into(),
        }
    }

    pub fn from_config(cfg: &StorageConfig) -> Self {
        Self::new(&cfg.root, &cfg.staging_dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    pub fn users_root(&self) -> PathBuf {
        self.root.join("users")
    }

    pub fn user_dir(&self, user_id: UserId) -> PathBuf {
        self.users_root().join(user_id.to_string())
    }

    /// Resolve a stored filename inside the owner's directory.
    pub fn resolve(&self, user_id: UserId, stored_name: &str) -> Result<PathBuf, GuardError> {
        join_inside(&self.user_dir(user_id), stored_name)
    }

    /// Check an upload temp path sits inside the staging directory.
    pub fn check_staged(&self, temp_path: &Path) -> Result<PathBuf, GuardError> {
        ensure_inside(&self.staging, temp_path)
    }

    /// Create the user's blob directory if needed.
    pub async fn ensure_user_dir(&self, user_id: UserId) -> Result<PathBuf> {
        let dir = self.user_dir(user_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating user dir: {}", dir.display()))?;
        Ok(dir)
    }

    /// Create root, users and staging directories.
    pub async fn ensure_layout(&self) -> Result<()> {
        for dir in [self.users_root(), self.staging.clone()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("creating dir: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Every `(user_id, blob name)` pair present on disk.
    pub async fn list_blobs(&self) -> Result<Vec<(UserId, String)>> {
        let users_root = self.users_root();
        let mut out = Vec::new();
        let mut users = match tokio::fs::read_dir(&users_root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => {
                return Err(e).with_context(|| format!("listing {}", users_root.display()))
            }
        };

        while let Some(entry) = users.next_entry().await? {
            let Some(user_id) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<UserId>().ok())
            else {
                debug!(path = %entry.path().display(), "skipping non-user entry");
                continue;
            };
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(entry.path()).await?;
            while let Some(f) = files.next_entry().await? {
                if let Some(name) = f.file_name().to_str() {
                    if is_blob_name(name) && f.file_type().await?.is_file() {
                        out.push((user_id, name.to_string()));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Staged files last modified more than `max_age_secs` ago.
    pub async fn stale_staged_files(&self, max_age_secs: u64) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.staging).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e).context("listing staging dir"),
        };
        let cutoff = std::time::Duration::from_secs(max_age_secs);
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .unwrap_or_default();
            if age >= cutoff {
                out.push(entry.path());
            }
        }
        Ok(out)
    }
}

/// Remove a file, treating "already gone" as success.
pub async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Verify the storage root exists and is writable.
pub async fn check_health(layout: &BlobLayout) -> Result<()> {
    layout.ensure_layout().await?;
    let probe = layout.root().join(".health-probe");
    tokio::fs::write(&probe, b"ok")
        .await
        .with_context(|| format!("storage root not writable: {}", layout.root().display()))?;
    remove_if_exists(&probe).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(dir: &Path) -> BlobLayout {
        BlobLayout::new(dir.join("storage"), dir.join("staging"))
    }

    #[test]
    fn blob_names_are_opaque_and_marked() {
        let a = new_blob_name();
        let b = new_blob_name();
        assert_ne!(a, b);
        assert!(is_blob_name(&a));
        assert!(!is_blob_name("report.pdf"));
        assert!(!a.contains('/'));
    }

    #[test]
    fn resolve_guards_stored_names() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        assert!(l.resolve(1, "abc.enc").is_ok());
        assert!(l.resolve(1, "../2/abc.enc").is_err());
        assert!(l.resolve(1, "../../../etc/passwd").is_err());
    }

    #[test]
    fn staged_paths_must_be_in_staging() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        assert!(l.check_staged(&dir.path().join("staging/tmp-1")).is_ok());
        assert!(l.check_staged(&dir.path().join("elsewhere/tmp-1")).is_err());
    }

    #[tokio::test]
    async fn list_blobs_finds_only_enc_files() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        let u1 = l.ensure_user_dir(1).await.unwrap();
        let u2 = l.ensure_user_dir(2).await.unwrap();
        std::fs::write(u1.join("a.enc"), b"x").unwrap();
        std::fs::write(u1.join("notes.txt"), b"x").unwrap();
        std::fs::write(u2.join("b.enc"), b"x").unwrap();
        std::fs::create_dir_all(l.users_root().join("lost+found")).unwrap();

        let mut blobs = l.list_blobs().await.unwrap();
        blobs.sort();
        assert_eq!(blobs, vec![(1, "a.enc".to_string()), (2, "b.enc".to_string())]);
    }

    #[tokio::test]
    async fn list_blobs_on_fresh_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(layout(dir.path()).list_blobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_if_exists_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x");
        std::fs::write(&p, b"1").unwrap();
        assert!(remove_if_exists(&p).await.unwrap());
        assert!(!remove_if_exists(&p).await.unwrap());
    }

    #[tokio::test]
    async fn stale_staged_files_respects_age() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        l.ensure_layout().await.unwrap();
        std::fs::write(l.staging_dir().join("tmp-1"), b"x").unwrap();

        assert_eq!(l.stale_staged_files(0).await.unwrap().len(), 1);
        assert!(l.stale_staged_files(3600).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_check_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        check_health(&l).await.unwrap();
        assert!(l.users_root().is_dir());
        assert!(l.staging_dir().is_dir());
    }
}
