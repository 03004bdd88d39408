//! vault: pocketvault command-line interface
//!
//! Accounts:
//!   init <username>              - create the first (admin) account
//!   user add|role|list           - manage accounts (admin)
//!
//! Files:
//!   put <path>                   - encrypt a local file into the vault
//!   get <id> [-o <path>]         - decrypt a file back out
//!   ls [--trash]                 - list files, newest first
//!   trash | restore | rm <id>    - lifecycle operations
//!   dupes [--all]                - groups of identical files
//!   hash-backfill                - fingerprint files that have no hash yet
//!   stats                        - file counts and stored bytes
//!
//! Maintenance:
//!   sweep                        - purge trash past the retention window
//!   reconcile [--dry-run]        - repair disk/metadata drift
//!   config show                  - print the active configuration
//!
//! The acting user comes from `--user` / `VAULT_USER`; the password from
//! `VAULT_PASSWORD` or an interactive prompt.

mod mime;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use vault_core::config::VaultConfig;
use vault_core::types::now_secs;
use vault_core::{FileId, FileRecord, Permission, Role, UserId, VaultError};
use vault_engine::{
    kdf_params, shared, Accounts, DuplicateScope, JsonStore, Session, UploadRequest, Vault,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "vault",
    version,
    about = "pocketvault client",
    long_about = "vault: store, retrieve and manage files in an encrypted per-user vault"
)]
struct Cli {
    /// Path to vault.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "VAULT_CONFIG",
        default_value = "/etc/pocketvault/vault.toml",
        global = true
    )]
    config: PathBuf,

    /// Account to act as
    #[arg(long, short = 'u', env = "VAULT_USER", global = true)]
    user: Option<String>,

    /// Log filter for diagnostics on stderr
    #[arg(long, env = "VAULT_LOG", default_value = "warn", global = true)]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the first account; it becomes the administrator
    Init {
        username: String,
    },

    /// Account management (requires user:manage)
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Encrypt a local file into the vault
    Put {
        /// Local file to store
        path: PathBuf,
        /// Stored display name (default: the local file name)
        #[arg(long, short = 'n')]
        name: Option<String>,
        /// MIME type (default: guessed from the extension)
        #[arg(long)]
        mime: Option<String>,
    },

    /// Decrypt a stored file
    Get {
        id: FileId,
        /// Destination path, or `-` for stdout (default: the stored name)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Overwrite an existing destination
        #[arg(long)]
        force: bool,
    },

    /// List files, newest first
    Ls {
        /// Show the trash instead of active files
        #[arg(long)]
        trash: bool,
        #[arg(long)]
        json: bool,
    },

    /// Move a file to the trash
    Trash {
        id: FileId,
    },

    /// Bring a file back from the trash
    Restore {
        id: FileId,
    },

    /// Permanently delete a file
    Rm {
        id: FileId,
    },

    /// Show groups of files with identical content
    Dupes {
        /// Look across every user's files (requires system:settings)
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },

    /// Compute content hashes for files that have none
    #[command(name = "hash-backfill")]
    HashBackfill,

    /// File counts and stored bytes for the acting user
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Purge trashed files older than the retention window (requires trash:purge)
    Sweep,

    /// Repair drift between blobs on disk and the metadata store (requires trash:purge)
    Reconcile {
        /// Report only; change nothing
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum UserAction {
    /// Create an account
    Add {
        username: String,
        /// admin, editor or viewer (default: viewer)
        #[arg(long)]
        role: Option<Role>,
    },
    /// Change an account's role
    Role {
        user_id: UserId,
        role: Role,
    },
    /// List accounts
    List,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log);

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<VaultError>() {
            Some(vault_err) => {
                tracing::debug!("{e:#}");
                eprintln!("error: {}", vault_err.user_message());
                eprintln!("       {}", vault_err.action());
            }
            None => eprintln!("error: {e:#}"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = vault_core::config::load_or_default(&cli.config)?;

    if let Commands::Config { action: ConfigAction::Show } = cli.command {
        return cmd_config_show(&config, &cli.config);
    }

    let ctx = VaultCtx::open(&config).await?;
    let user = cli.user.as_deref();

    match cli.command {
        Commands::Init { username } => cmd_init(&ctx, &username).await,
        Commands::User { action } => cmd_user(&ctx, user, action).await,
        Commands::Put { path, name, mime } => {
            cmd_put(&ctx, user, &path, name.as_deref(), mime.as_deref()).await
        }
        Commands::Get { id, output, force } => cmd_get(&ctx, user, id, output, force).await,
        Commands::Ls { trash, json } => cmd_ls(&ctx, user, trash, json).await,
        Commands::Trash { id } => {
            let session = ctx.login(user).await?;
            let rec = ctx.vault.trash(Some(&session), id).await?;
            println!("trashed {} ({})", rec.id, rec.filename);
            Ok(())
        }
        Commands::Restore { id } => {
            let session = ctx.login(user).await?;
            let rec = ctx.vault.restore(Some(&session), id).await?;
            println!("restored {} ({})", rec.id, rec.filename);
            Ok(())
        }
        Commands::Rm { id } => {
            let session = ctx.login(user).await?;
            ctx.vault.delete(Some(&session), id).await?;
            println!("deleted {id}");
            Ok(())
        }
        Commands::Dupes { all, json } => cmd_dupes(&ctx, user, all, json).await,
        Commands::HashBackfill => cmd_hash_backfill(&ctx, user).await,
        Commands::Stats { json } => cmd_stats(&ctx, user, json).await,
        Commands::Sweep => cmd_sweep(&ctx, user).await,
        Commands::Reconcile { dry_run, json } => cmd_reconcile(&ctx, user, dry_run, json).await,
        Commands::Config { .. } => Ok(()),
    }
}

fn init_logging(filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Vault context and login ───────────────────────────────────────────────────

struct VaultCtx {
    vault: Vault,
    accounts: Accounts,
}

impl VaultCtx {
    async fn open(config: &VaultConfig) -> Result<Self> {
        let path = &config.storage.metadata_path;
        let store = JsonStore::open(path)
            .with_context(|| format!("opening metadata store: {}", path.display()))?;
        let vault = Vault::new(config, shared(store));
        vault_storage::check_health(vault.layout())
            .await
            .context("storage root health check")?;
        let accounts = Accounts::new(vault.store().clone(), kdf_params(&config.crypto));
        Ok(Self { vault, accounts })
    }

    async fn login(&self, user: Option<&str>) -> Result<Session> {
        let Some(username) = user else {
            bail!("no account given; pass --user or set VAULT_USER");
        };
        let password = read_password(&format!("password for {username}: "))?;
        Ok(self.accounts.login(username, &password).await?)
    }
}

/// `VAULT_PASSWORD` when set, otherwise an interactive prompt.
fn read_password(prompt: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var("VAULT_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(pw))
}

fn read_new_password(username: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var("VAULT_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    let first = rpassword::prompt_password(format!("new password for {username}: "))
        .context("reading password")?;
    let again = rpassword::prompt_password("repeat password: ").context("reading password")?;
    if first != again {
        bail!("passwords do not match");
    }
    Ok(SecretString::from(first))
}

// ── `vault init` / `vault user` ───────────────────────────────────────────────

async fn cmd_init(ctx: &VaultCtx, username: &str) -> Result<()> {
    if ctx.accounts.setup_completed().await? {
        bail!("vault is already initialised; use `vault user add` as an administrator");
    }
    let password = read_new_password(username)?;
    let user = ctx.accounts.create_user(None, username, &password, None).await?;
    println!("created administrator '{}' (id {})", user.username, user.id);
    Ok(())
}

async fn cmd_user(ctx: &VaultCtx, user: Option<&str>, action: UserAction) -> Result<()> {
    let session = ctx.login(user).await?;
    match action {
        UserAction::Add { username, role } => {
            let password = read_new_password(&username)?;
            let created = ctx
                .accounts
                .create_user(Some(&session), &username, &password, role)
                .await?;
            println!(
                "created '{}' (id {}, role {})",
                created.username, created.id, created.role
            );
        }
        UserAction::Role { user_id, role } => {
            ctx.accounts.set_role(Some(&session), user_id, role).await?;
            println!("user {user_id} is now {role}");
        }
        UserAction::List => {
            let users = ctx.accounts.list_users(Some(&session)).await?;
            println!("{:>5}  {:<8}  username", "id", "role");
            for u in users {
                println!("{:>5}  {:<8}  {}", u.id, u.role.to_string(), u.username);
            }
        }
    }
    Ok(())
}

// ── `vault put` ───────────────────────────────────────────────────────────────

async fn cmd_put(
    ctx: &VaultCtx,
    user: Option<&str>,
    local: &Path,
    name: Option<&str>,
    mime: Option<&str>,
) -> Result<()> {
    let meta = tokio::fs::metadata(local)
        .await
        .with_context(|| format!("reading {}", local.display()))?;
    if !meta.is_file() {
        bail!("not a regular file: {}", local.display());
    }
    let filename = match name {
        Some(n) => n.to_string(),
        None => local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .context("path has no file name; pass --name")?,
    };
    let mimetype = mime.unwrap_or_else(|| mime::guess(local));

    let session = ctx.login(user).await?;

    // The engine consumes its input from the staging directory.
    let staged = stage_copy(ctx.vault.layout().staging_dir(), local).await?;
    let rec = ctx
        .vault
        .upload(
            Some(&session),
            UploadRequest {
                temp_path: &staged,
                filename: &filename,
                mimetype,
                size: meta.len(),
            },
        )
        .await?;

    println!("stored {} as id {}", rec.filename, rec.id);
    println!("  size:      {}", fmt_bytes(rec.size));
    println!("  type:      {}", rec.mimetype);
    println!("  encrypted: {}", rec.encrypted);
    Ok(())
}

/// Copy `local` into the staging directory under a fresh unique name.
async fn stage_copy(staging: &Path, local: &Path) -> Result<PathBuf> {
    let staged = staging.join(format!("cli-{}", uuid::Uuid::new_v4()));
    tokio::fs::copy(local, &staged)
        .await
        .with_context(|| format!("staging {}", local.display()))?;
    Ok(staged)
}

// ── `vault get` ───────────────────────────────────────────────────────────────

async fn cmd_get(
    ctx: &VaultCtx,
    user: Option<&str>,
    id: FileId,
    output: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let session = ctx.login(user).await?;
    let download = ctx.vault.download(Some(&session), id).await?;
    let headers = download.headers().clone();

    if output.as_deref() == Some(Path::new("-")) {
        let mut stdout = tokio::io::stdout();
        download.stream_to(&mut stdout).await?;
        stdout.flush().await?;
        return Ok(());
    }

    let dest = output.unwrap_or_else(|| PathBuf::from(safe_local_name(&headers.filename)));
    if dest.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", dest.display());
    }

    let mut file = tokio::fs::File::create(&dest)
        .await
        .with_context(|| format!("creating {}", dest.display()))?;
    let result = download.stream_to(&mut file).await;
    match result {
        Ok(stats) => {
            file.flush().await?;
            println!("wrote {} ({})", dest.display(), fmt_bytes(stats.bytes_out));
            Ok(())
        }
        Err(e) => {
            drop(file);
            // Never leave a partially decrypted file behind.
            let _ = tokio::fs::remove_file(&dest).await;
            Err(e.into())
        }
    }
}

/// Stored names are display names; keep only the final component locally.
fn safe_local_name(stored: &str) -> String {
    let base = stored
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    match base {
        "" | "." | ".." => "download".to_string(),
        other => other.to_string(),
    }
}

// ── `vault ls` / `vault stats` ────────────────────────────────────────────────

async fn cmd_ls(ctx: &VaultCtx, user: Option<&str>, trash: bool, json: bool) -> Result<()> {
    let session = ctx.login(user).await?;
    let files = if trash {
        ctx.vault.list_trash(Some(&session)).await?
    } else {
        ctx.vault.list_for_user(Some(&session)).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
        return Ok(());
    }
    if files.is_empty() {
        println!("{}", if trash { "trash is empty" } else { "no files" });
        return Ok(());
    }
    let now = now_secs();
    println!("{:>6}  {:>10}  {:<3}  {:>10}  name", "id", "size", "enc", "age");
    for f in &files {
        println!("{}", ls_line(f, now, trash));
    }
    Ok(())
}

fn ls_line(f: &FileRecord, now: u64, trash: bool) -> String {
    let stamp = if trash {
        f.trashed_at.unwrap_or(f.uploaded_at)
    } else {
        f.uploaded_at
    };
    format!(
        "{:>6}  {:>10}  {:<3}  {:>10}  {}",
        f.id,
        fmt_bytes(f.size),
        if f.encrypted { "yes" } else { "no" },
        fmt_age(now.saturating_sub(stamp)),
        f.filename
    )
}

async fn cmd_stats(ctx: &VaultCtx, user: Option<&str>, json: bool) -> Result<()> {
    let session = ctx.login(user).await?;
    let usage = ctx.vault.usage(Some(&session)).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&usage)?);
        return Ok(());
    }
    println!("files:      {}", usage.total_files);
    println!("encrypted:  {}", usage.encrypted_files);
    println!("in trash:   {}", usage.trashed_files);
    println!("stored:     {}", fmt_bytes(usage.total_bytes));
    Ok(())
}

// ── `vault dupes` / `vault hash-backfill` ─────────────────────────────────────

async fn cmd_dupes(ctx: &VaultCtx, user: Option<&str>, all: bool, json: bool) -> Result<()> {
    let session = ctx.login(user).await?;
    let scope = if all {
        DuplicateScope::AllUsers
    } else {
        DuplicateScope::Own
    };
    let groups = ctx.vault.find_duplicates(Some(&session), scope).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }
    if groups.is_empty() {
        println!("no duplicates (run `vault hash-backfill` to fingerprint older files)");
        return Ok(());
    }
    for g in &groups {
        println!("{} ({} files)", &g.hash[..16.min(g.hash.len())], g.files.len());
        for m in &g.files {
            println!(
                "  {:>6}  user {:>4}  {:>10}  {}",
                m.id,
                m.user_id,
                fmt_bytes(m.size),
                m.filename
            );
        }
    }
    Ok(())
}

async fn cmd_hash_backfill(ctx: &VaultCtx, user: Option<&str>) -> Result<()> {
    let session = ctx.login(user).await?;
    let report = ctx.vault.backfill_hashes(Some(&session)).await?;
    println!("hashed: {} files", report.hashed.len());
    if !report.failed.is_empty() {
        println!("failed: {:?}", report.failed);
    }
    Ok(())
}

// ── `vault sweep` / `vault reconcile` ─────────────────────────────────────────

async fn cmd_sweep(ctx: &VaultCtx, user: Option<&str>) -> Result<()> {
    let session = ctx.login(user).await?;
    ctx.vault
        .gate()
        .require(Some(&session), Permission::TrashPurge)
        .await?;
    let report = ctx.vault.purge_expired().await?;
    println!("purged: {} files", report.purged.len());
    if !report.failed.is_empty() {
        println!("failed: {:?} (will retry next sweep)", report.failed);
    }
    Ok(())
}

async fn cmd_reconcile(ctx: &VaultCtx, user: Option<&str>, dry_run: bool, json: bool) -> Result<()> {
    let session = ctx.login(user).await?;
    ctx.vault
        .gate()
        .require(Some(&session), Permission::TrashPurge)
        .await?;
    let report = ctx.vault.reconcile(dry_run).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    let verb = if dry_run { "would remove" } else { "removed" };
    println!("orphan rows:   {} {:?}", verb, report.orphan_rows);
    println!("stray blobs:   {} {}", verb, report.stray_blobs.len());
    for p in &report.stray_blobs {
        println!("  {}", p.display());
    }
    println!("stale staging: {} {}", verb, report.stale_staging.len());
    if report.errors > 0 {
        println!("errors:        {}", report.errors);
    }
    Ok(())
}

// ── `vault config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &VaultConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Formatting ────────────────────────────────────────────────────────────────

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn fmt_age(secs: u64) -> String {
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}
