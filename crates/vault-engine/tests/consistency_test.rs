//! Disk/metadata ordering under failure, retention and reconciliation.

mod common;

use common::Harness;
use vault_core::types::now_secs;
use vault_core::VaultError;
use vault_engine::UploadRequest;

async fn upload_text(h: &Harness, session: &vault_engine::Session, name: &str, body: &[u8]) -> vault_core::FileRecord {
    let staged = h.stage(&format!("stage-{name}"), body);
    h.vault
        .upload(
            Some(session),
            UploadRequest {
                temp_path: &staged,
                filename: name,
                mimetype: "text/plain",
                size: body.len() as u64,
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn delete_removes_blob_then_row() {
    let h = Harness::new();
    let (_admin, bob, _carol) = h.three_users().await;
    let rec = upload_text(&h, &bob, "a.txt", b"alpha").await;

    h.vault.delete(Some(&bob), rec.id).await.unwrap();
    assert!(!h.blob_path(&rec).exists());
    assert!(h.store.lock().await.file(rec.id).unwrap().is_none());
}

#[tokio::test]
async fn crash_between_blob_and_row_delete_leaves_orphan_row_only() {
    let h = Harness::new();
    let (_admin, bob, _carol) = h.three_users().await;
    let rec = upload_text(&h, &bob, "a.txt", b"alpha").await;

    h.faults.set_fail_remove(true);
    let err = h.vault.delete(Some(&bob), rec.id).await.unwrap_err();
    assert!(matches!(err, VaultError::StorageBackend(_)));

    // Blob gone, row still there: never the other way round.
    assert!(!h.blob_path(&rec).exists());
    assert!(h.store.lock().await.file(rec.id).unwrap().is_some());

    h.faults.set_fail_remove(false);
    let report = h.vault.reconcile(false).await.unwrap();
    assert_eq!(report.orphan_rows, vec![rec.id]);
    assert_eq!(report.errors, 0);
    assert!(h.store.lock().await.file(rec.id).unwrap().is_none());
}

#[tokio::test]
async fn delete_with_missing_blob_is_not_found_and_keeps_row() {
    let h = Harness::new();
    let (_admin, bob, _carol) = h.three_users().await;
    let rec = upload_text(&h, &bob, "a.txt", b"alpha").await;
    std::fs::remove_file(h.blob_path(&rec)).unwrap();

    let err = h.vault.delete(Some(&bob), rec.id).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(h.store.lock().await.file(rec.id).unwrap().is_some());
}

#[tokio::test]
async fn download_with_missing_blob_is_not_found() {
    let h = Harness::new();
    let (_admin, bob, _carol) = h.three_users().await;
    let rec = upload_text(&h, &bob, "a.txt", b"alpha").await;
    std::fs::remove_file(h.blob_path(&rec)).unwrap();

    let err = h.vault.download(Some(&bob), rec.id).await.err().unwrap();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn purge_respects_retention_window() {
    let h = Harness::new();
    let (_admin, bob, _carol) = h.three_users().await;
    let old = upload_text(&h, &bob, "old.txt", b"old").await;
    let fresh = upload_text(&h, &bob, "fresh.txt", b"fresh").await;
    let active = upload_text(&h, &bob, "active.txt", b"active").await;

    h.vault.trash(Some(&bob), fresh.id).await.unwrap();
    let mut aged = h.vault.trash(Some(&bob), old.id).await.unwrap();
    aged.trashed_at = Some(now_secs() - 31 * 24 * 60 * 60);
    h.store.lock().await.update_file(aged).unwrap();

    let report = h.vault.purge_expired().await.unwrap();
    assert_eq!(report.purged, vec![old.id]);
    assert!(report.failed.is_empty());
    assert!(!h.blob_path(&old).exists());
    assert!(h.blob_path(&fresh).exists());
    assert!(h.blob_path(&active).exists());

    let store = h.store.lock().await;
    assert!(store.file(old.id).unwrap().is_none());
    assert!(store.file(fresh.id).unwrap().is_some());
}

#[tokio::test]
async fn purge_removes_row_even_when_blob_already_gone() {
    let h = Harness::new();
    let (_admin, bob, _carol) = h.three_users().await;
    let rec = upload_text(&h, &bob, "a.txt", b"alpha").await;
    h.vault.trash(Some(&bob), rec.id).await.unwrap();
    std::fs::remove_file(h.blob_path(&rec)).unwrap();

    let report = h.vault.purge_trashed_before(now_secs() + 1).await.unwrap();
    assert_eq!(report.purged, vec![rec.id]);
}

#[tokio::test]
async fn purge_is_best_effort_per_file() {
    let h = Harness::new();
    let (_admin, bob, _carol) = h.three_users().await;
    let a = upload_text(&h, &bob, "a.txt", b"alpha").await;
    h.vault.trash(Some(&bob), a.id).await.unwrap();

    h.faults.set_fail_remove(true);
    let report = h.vault.purge_trashed_before(now_secs() + 1).await.unwrap();
    assert_eq!(report.failed, vec![a.id]);
    assert!(report.purged.is_empty());
}

#[tokio::test]
async fn reconcile_finds_stray_blobs_and_stale_staging() {
    let h = Harness::with_config(|c| c.retention.stale_after_secs = 0);
    let (_admin, bob, _carol) = h.three_users().await;
    let kept = upload_text(&h, &bob, "kept.txt", b"keep").await;

    let stray = h.blob_path(&kept).with_file_name("stray.enc");
    std::fs::write(&stray, b"no row points here").unwrap();
    let leftover = h.stage("leftover", b"abandoned upload");

    let dry = h.vault.reconcile(true).await.unwrap();
    assert!(dry.dry_run);
    assert_eq!(dry.stray_blobs.len(), 1);
    assert_eq!(dry.stale_staging.len(), 1);
    assert!(dry.orphan_rows.is_empty());
    assert!(stray.exists() && leftover.exists(), "dry run must not repair");

    let fixed = h.vault.reconcile(false).await.unwrap();
    assert_eq!(fixed.stray_blobs.len(), 1);
    assert!(!stray.exists());
    assert!(!leftover.exists());
    assert!(h.blob_path(&kept).exists());

    assert!(h.vault.reconcile(false).await.unwrap().is_clean());
}

#[tokio::test]
async fn reconcile_leaves_young_strays_alone() {
    let h = Harness::new();
    let (_admin, bob, _carol) = h.three_users().await;
    let kept = upload_text(&h, &bob, "kept.txt", b"keep").await;
    let stray = h.blob_path(&kept).with_file_name("in-flight.enc");
    std::fs::write(&stray, b"upload still running").unwrap();

    let report = h.vault.reconcile(false).await.unwrap();
    assert!(report.stray_blobs.is_empty());
    assert!(stray.exists());
}
