//! Trash retention sweep.

use serde::Serialize;
use tracing::{info, warn};
use vault_core::types::now_secs;
use vault_core::{FileId, VaultResult};
use vault_storage::blob::remove_if_exists;

use crate::vault::Vault;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub purged: Vec<FileId>,
    pub failed: Vec<FileId>,
}

impl Vault {
    /// Permanently remove every file trashed longer than the retention window.
    pub async fn purge_expired(&self) -> VaultResult<PurgeReport> {
        let cutoff = now_secs().saturating_sub(self.trash_window_secs);
        self.purge_trashed_before(cutoff).await
    }

    /// Remove files whose `trashed_at` is strictly before `cutoff`.
    ///
    /// Best effort per file: a failure is logged, recorded, and the sweep
    /// moves on. A missing blob does not block removal of its row.
    pub async fn purge_trashed_before(&self, cutoff: u64) -> VaultResult<PurgeReport> {
        let expired: Vec<_> = self
            .store
            .lock()
            .await
            .files()?
            .into_iter()
            .filter(|f| f.trashed_at.is_some_and(|t| t < cutoff))
            .collect();

        let mut report = PurgeReport::default();
        for file in expired {
            let path = match self.layout.resolve(file.user_id, &file.filepath) {
                Ok(p) => p,
                Err(e) => {
                    warn!(file_id = file.id, "purge skipped, bad stored path: {e}");
                    report.failed.push(file.id);
                    continue;
                }
            };
            if let Err(e) = remove_if_exists(&path).await {
                warn!(file_id = file.id, path = %path.display(), "purge: blob removal failed: {e}");
                report.failed.push(file.id);
                continue;
            }
            let removed = self.store.lock().await.remove_file(file.id);
            match removed {
                Ok(_) => report.purged.push(file.id),
                Err(e) => {
                    warn!(file_id = file.id, "purge: row removal failed: {e:#}");
                    report.failed.push(file.id);
                }
            }
        }

        if !report.purged.is_empty() || !report.failed.is_empty() {
            info!(
                purged = report.purged.len(),
                failed = report.failed.len(),
                "trash retention sweep finished"
            );
        }
        Ok(report)
    }
}
