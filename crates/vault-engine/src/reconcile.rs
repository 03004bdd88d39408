//! Disk/metadata reconciliation.
//!
//! Disk is treated as the source of truth for whether a blob exists:
//!   - orphan row: the row's blob is missing, so the row goes
//!   - stray blob: a `.enc` file no row references, so the blob goes
//!   - stale staging file: an upload temp file nobody cleaned up
//!
//! Stray blobs and staging files younger than `stale_after_secs` are left
//! alone; they may belong to an upload still in flight.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use vault_core::{FileId, UserId, VaultResult};
use vault_storage::blob::remove_if_exists;

use crate::vault::Vault;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub dry_run: bool,
    pub orphan_rows: Vec<FileId>,
    pub stray_blobs: Vec<PathBuf>,
    pub stale_staging: Vec<PathBuf>,
    pub errors: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_rows.is_empty() && self.stray_blobs.is_empty() && self.stale_staging.is_empty()
    }
}

impl Vault {
    /// Find (and unless `dry_run`, repair) disk/metadata mismatches.
    pub async fn reconcile(&self, dry_run: bool) -> VaultResult<ReconcileReport> {
        let mut report = ReconcileReport {
            dry_run,
            ..Default::default()
        };

        let files = self.store.lock().await.files()?;
        let mut referenced: HashSet<(UserId, String)> = HashSet::with_capacity(files.len());
        for file in &files {
            referenced.insert((file.user_id, file.filepath.clone()));
            let exists = match self.layout.resolve(file.user_id, &file.filepath) {
                Ok(path) => tokio::fs::try_exists(&path).await?,
                Err(e) => {
                    warn!(file_id = file.id, "stored path rejected by guard: {e}");
                    false
                }
            };
            if !exists {
                report.orphan_rows.push(file.id);
            }
        }

        let grace = Duration::from_secs(self.stale_after_secs);
        for (user_id, name) in self.layout.list_blobs().await? {
            if referenced.contains(&(user_id, name.clone())) {
                continue;
            }
            let path = self.layout.user_dir(user_id).join(&name);
            let age = tokio::fs::metadata(&path)
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|m| m.elapsed().ok())
                .unwrap_or_default();
            if age >= grace {
                report.stray_blobs.push(path);
            }
        }

        report.stale_staging = self
            .layout
            .stale_staged_files(self.stale_after_secs)
            .await?;

        if !dry_run {
            self.repair(&mut report).await;
        }

        if !report.is_clean() {
            info!(
                dry_run,
                orphan_rows = report.orphan_rows.len(),
                stray_blobs = report.stray_blobs.len(),
                stale_staging = report.stale_staging.len(),
                errors = report.errors,
                "reconciliation finished"
            );
        }
        Ok(report)
    }

    async fn repair(&self, report: &mut ReconcileReport) {
        for id in &report.orphan_rows {
            let removed = self.store.lock().await.remove_file(*id);
            if let Err(e) = removed {
                warn!(file_id = id, "could not drop orphan row: {e:#}");
                report.errors += 1;
            }
        }
        for path in report.stray_blobs.iter().chain(&report.stale_staging) {
            if let Err(e) = remove_if_exists(path).await {
                warn!(path = %path.display(), "could not remove stray file: {e}");
                report.errors += 1;
            }
        }
    }
}
