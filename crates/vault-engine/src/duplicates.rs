//! Duplicate detection over plaintext content hashes.
//!
//! Hashes are filled in lazily by `backfill_hashes`: encrypted files are
//! decrypted straight into a hashing sink, legacy files are hashed as stored.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::fs::File;
use tracing::{debug, info, warn};
use vault_core::types::{DuplicateGroup, DuplicateMember};
use vault_core::{FileId, FileRecord, Permission, VaultError, VaultResult};
use vault_crypto::{decrypt_stream_with_key, AuthTag, Iv};
use vault_storage::{hash_file, hash_to_hex, HashingWriter};

use crate::error::{from_crypto, from_guard};
use crate::keying;
use crate::session::{Session, SessionSecret};
use crate::vault::{key_context, Vault};

/// Which files a duplicate query looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateScope {
    /// Only the caller's files
    Own,
    /// Every user's files; requires `system:settings` as well
    AllUsers,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    pub hashed: Vec<FileId>,
    pub failed: Vec<FileId>,
}

impl Vault {
    /// Groups of two or more files with identical content.
    pub async fn find_duplicates(
        &self,
        session: Option<&Session>,
        scope: DuplicateScope,
    ) -> VaultResult<Vec<DuplicateGroup>> {
        let auth = match scope {
            DuplicateScope::Own => self.gate.require(session, Permission::DuplicatesView).await?,
            DuplicateScope::AllUsers => {
                self.gate
                    .require_all(
                        session,
                        &[Permission::DuplicatesView, Permission::SystemSettings],
                    )
                    .await?
            }
        };

        let files = match scope {
            DuplicateScope::Own => self.store.lock().await.files_for_user(auth.user_id)?,
            DuplicateScope::AllUsers => self.store.lock().await.files()?,
        };
        Ok(group_by_hash(&files))
    }

    /// Compute missing content hashes for the caller's files.
    ///
    /// Needs an unlocked session when any encrypted file is pending. Per-file
    /// failures (missing blob, integrity error) are logged and skipped.
    pub async fn backfill_hashes(&self, session: Option<&Session>) -> VaultResult<BackfillReport> {
        let auth = self.gate.require(session, Permission::DuplicatesView).await?;
        let pending: Vec<FileRecord> = self
            .store
            .lock()
            .await
            .files_for_user(auth.user_id)?
            .into_iter()
            .filter(|f| f.file_hash.is_none())
            .collect();

        let mut report = BackfillReport::default();
        if pending.is_empty() {
            return Ok(report);
        }
        let secret = session.and_then(Session::secret);
        if secret.is_none() && pending.iter().any(|f| f.encrypted) {
            return Err(VaultError::AuthenticationRequired);
        }

        for mut file in pending {
            match self.content_hash(&file, secret).await {
                Ok(hex) => {
                    file.file_hash = Some(hex);
                    match self.update_row(&file).await {
                        Ok(()) => report.hashed.push(file.id),
                        Err(e) => {
                            warn!(file_id = file.id, "storing hash failed: {e}");
                            report.failed.push(file.id);
                        }
                    }
                }
                Err(e) => {
                    warn!(file_id = file.id, "hashing failed: {e}");
                    report.failed.push(file.id);
                }
            }
        }

        info!(
            user_id = auth.user_id,
            hashed = report.hashed.len(),
            failed = report.failed.len(),
            "hash backfill finished"
        );
        Ok(report)
    }

    async fn content_hash(
        &self,
        file: &FileRecord,
        secret: Option<&SessionSecret>,
    ) -> VaultResult<String> {
        let path = self
            .layout
            .resolve(file.user_id, &file.filepath)
            .map_err(from_guard)?;

        if !file.encrypted {
            let hash = hash_file(&path).await?;
            return Ok(hash_to_hex(&hash));
        }

        let secret = secret.ok_or(VaultError::AuthenticationRequired)?;
        let (Some(iv), Some(tag)) = (&file.iv, &file.auth_tag) else {
            return Err(VaultError::Integrity(format!("file {} has no iv/auth_tag", file.id)));
        };
        let iv = Iv::from_base64(iv).map_err(from_crypto)?;
        let tag = AuthTag::from_base64(tag).map_err(from_crypto)?;
        let context = key_context(file.user_id, file.id);
        let key = keying::file_key(secret, &context).await?;

        let mut src = File::open(&path).await?;
        let mut sink = HashingWriter::sink();
        decrypt_stream_with_key(
            &mut src,
            &mut sink,
            &key,
            &context,
            &iv,
            &tag,
            file.chunk_size.unwrap_or(self.chunk_size),
        )
        .await
        .map_err(from_crypto)?;

        debug!(file_id = file.id, bytes = sink.bytes_written(), "plaintext hashed");
        Ok(hash_to_hex(&sink.finalize()))
    }
}

/// Group rows by hash, keeping only groups with more than one member.
fn group_by_hash(files: &[FileRecord]) -> Vec<DuplicateGroup> {
    let mut groups: BTreeMap<&str, Vec<DuplicateMember>> = BTreeMap::new();
    for f in files {
        if let Some(hash) = f.file_hash.as_deref() {
            groups.entry(hash).or_default().push(DuplicateMember::from(f));
        }
    }
    groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(hash, files)| DuplicateGroup {
            hash: hash.to_string(),
            files,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: FileId, user_id: u64, hash: Option<&str>) -> FileRecord {
        FileRecord {
            id,
            user_id,
            filename: format!("f{id}"),
            filepath: format!("{id}.enc"),
            size: 10,
            mimetype: "text/plain".into(),
            uploaded_at: id,
            iv: None,
            auth_tag: None,
            encrypted: false,
            trashed_at: None,
            file_hash: hash.map(String::from),
            chunk_size: None,
        }
    }

    #[test]
    fn groups_only_equal_hashes() {
        let rows = vec![
            row(1, 1, Some("aa")),
            row(2, 1, Some("aa")),
            row(3, 1, Some("bb")),
            row(4, 1, None),
            row(5, 1, None),
        ];
        let groups = group_by_hash(&rows);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].hash, "aa");
        let ids: Vec<_> = groups[0].files.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn no_groups_without_hashes() {
        assert!(group_by_hash(&[row(1, 1, None), row(2, 1, None)]).is_empty());
    }
}
