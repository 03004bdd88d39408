//! Daemon lifecycle: startup, health check, systemd notify, sweep loop

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info, warn};
use vault_core::config::VaultConfig;
use vault_engine::{shared, JsonStore, Vault};
use vault_storage::check_health;

pub async fn run(config: VaultConfig) -> Result<()> {
    let vault = open_vault(&config).await?;
    let period = Duration::from_secs(config.daemon.sweep_interval_secs.max(1));

    notify_ready();
    info!(interval_secs = period.as_secs(), "sweep loop running");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep(&vault, config.retention.reconcile_on_sweep).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    info!("vaultd stopped");
    Ok(())
}

pub async fn run_once(config: VaultConfig) -> Result<()> {
    let vault = open_vault(&config).await?;
    sweep(&vault, config.retention.reconcile_on_sweep).await;
    Ok(())
}

async fn open_vault(config: &VaultConfig) -> Result<Vault> {
    let store = JsonStore::open(&config.storage.metadata_path)?;
    let vault = Vault::new(config, shared(store));

    check_health(vault.layout())
        .await
        .context("storage root health check")?;
    info!(
        root = %config.storage.root.display(),
        metadata = %config.storage.metadata_path.display(),
        trash_days = config.retention.trash_days,
        "storage ready"
    );
    Ok(vault)
}

/// One housekeeping pass. Failures are logged; the loop keeps going.
async fn sweep(vault: &Vault, reconcile: bool) {
    match vault.purge_expired().await {
        Ok(report) if !report.failed.is_empty() => {
            warn!(failed = ?report.failed, "some expired files could not be purged");
        }
        Ok(_) => {}
        Err(e) => error!("retention sweep failed: {e}"),
    }

    if reconcile {
        match vault.reconcile(false).await {
            Ok(report) if report.errors > 0 => {
                warn!(errors = report.errors, "reconciliation left unrepaired items");
            }
            Ok(_) => {}
            Err(e) => error!("reconciliation failed: {e}"),
        }
    }
}

fn notify_ready() {
    // sd_notify(READY=1) when started by systemd; no-op otherwise
    #[cfg(unix)]
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> VaultConfig {
        let mut config = VaultConfig::default();
        config.storage.root = dir.join("storage");
        config.storage.metadata_path = dir.join("vault.json");
        config.storage.staging_dir = dir.join("staging");
        config.retention.stale_after_secs = 0;
        config
    }

    #[tokio::test]
    async fn run_once_prepares_layout_and_clears_staging() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(&config.storage.staging_dir).unwrap();
        let leftover = config.storage.staging_dir.join("abandoned");
        std::fs::write(&leftover, b"x").unwrap();

        run_once(config.clone()).await.unwrap();

        assert!(config.storage.root.join("users").is_dir());
        assert!(!leftover.exists());
    }

    #[tokio::test]
    async fn run_once_without_reconcile_keeps_staging() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.retention.reconcile_on_sweep = false;
        std::fs::create_dir_all(&config.storage.staging_dir).unwrap();
        let leftover = config.storage.staging_dir.join("abandoned");
        std::fs::write(&leftover, b"x").unwrap();

        run_once(config).await.unwrap();
        assert!(leftover.exists());
    }
}
