use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use vaultsync::{
    EventChannel, FingerprintStore, SettingsStore, SyncEngine, SyncEvent, SyncOutcome, SyncTrigger,
};
use vaultsync_core::VaultServerClient;

/// File inside the vault holding the content-fingerprint cache.
const FINGERPRINT_FILE: &str = ".vaultsync-fingerprints.json";

#[derive(Parser)]
#[command(name = "vaultsync")]
#[command(about = "Synchronize a local vault of files with a memo server")]
struct Cli {
    /// Config file path (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the auth token
    Login {
        /// Server URL
        #[arg(long, default_value = "http://localhost:8005")]
        url: String,
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Run one full sync cycle for a vault
    Sync {
        /// Vault directory
        vault_path: PathBuf,
        /// Vault name reported to the server (defaults to the directory name)
        #[arg(long)]
        vault: Option<String>,
        /// Skip the server round trip when no local file changed
        #[arg(long)]
        background: bool,
    },
    /// Upload a single file from a vault
    Push {
        /// Vault directory
        vault_path: PathBuf,
        /// Vault-relative file path
        file: String,
    },
    /// Show the stored configuration and last sync time
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = config_path(cli.config)?;
    debug!("using config at {}", config_path.display());

    match cli.command {
        Commands::Login {
            url,
            username,
            password,
        } => login(&config_path, url, username, password).await,
        Commands::Sync {
            vault_path,
            vault,
            background,
        } => {
            let trigger = if background {
                SyncTrigger::Background
            } else {
                SyncTrigger::Manual
            };
            sync(&config_path, &vault_path, vault, trigger).await
        }
        Commands::Push { vault_path, file } => push(&config_path, &vault_path, &file).await,
        Commands::Status => status(&config_path).await,
    }
}

fn config_path(override_path: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path);
    }
    let dir = dirs::config_dir().ok_or_else(|| anyhow!("no user config directory found"))?;
    Ok(dir.join("vaultsync").join("config.json"))
}

async fn login(
    config_path: &Path,
    url: String,
    username: String,
    password: String,
) -> Result<()> {
    let client = VaultServerClient::new(&url).context("invalid server URL")?;

    match client.login(&username, &password).await {
        Ok(token) => {
            let mut store = SettingsStore::load(config_path).await?;
            let settings = store.settings_mut();
            settings.server_url = url;
            settings.username = username;
            settings.password = password;
            settings.token = token;
            store.save().await?;
            println!("✅ Logged in, token stored");
            Ok(())
        }
        Err(e) => {
            println!("❌ Login failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn sync(
    config_path: &Path,
    vault_path: &Path,
    vault_name: Option<String>,
    trigger: SyncTrigger,
) -> Result<()> {
    let (engine, mut channel) = build_engine(config_path, vault_path, vault_name).await?;

    // Ctrl-C interrupts cooperatively; the current step finishes first.
    let watcher = {
        let engine = engine.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupt requested, finishing the current step");
                engine.interrupt();
            }
        })
    };

    let mut cycle = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.sync_all(trigger).await })
    };

    let outcome = loop {
        tokio::select! {
            event = channel.recv() => {
                if let Some(event) = event {
                    print_event(&event);
                }
            }
            result = &mut cycle => {
                break result.context("sync task panicked")?;
            }
        }
    };
    for event in channel.drain() {
        print_event(&event);
    }
    watcher.abort();

    match outcome {
        Ok(SyncOutcome::Completed(summary)) if summary.interrupted => {
            println!("⚠️ Sync interrupted; run again to finish");
            Ok(())
        }
        Ok(SyncOutcome::Completed(_)) => {
            println!("✅ Sync completed");
            Ok(())
        }
        Ok(SyncOutcome::NothingToDo) => {
            println!("✅ Already up to date");
            Ok(())
        }
        Ok(SyncOutcome::NotAuthenticated) => {
            println!("❌ Not logged in; run `vaultsync login` first");
            std::process::exit(1);
        }
        Err(e) => {
            println!("❌ Sync failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn push(config_path: &Path, vault_path: &Path, file: &str) -> Result<()> {
    let (engine, _channel) = build_engine(config_path, vault_path, None).await?;

    match engine.sync_file(file).await {
        Ok(true) => {
            println!("✅ Uploaded {file}");
            Ok(())
        }
        Ok(false) => {
            println!("❌ Server did not accept {file}");
            std::process::exit(1);
        }
        Err(e) => {
            println!("❌ Upload failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn status(config_path: &Path) -> Result<()> {
    let store = SettingsStore::load(config_path).await?;
    let settings = store.settings();

    println!("server:    {}", settings.server_url);
    println!("user:      {}", settings.username);
    println!("vault:     {}", settings.vault);
    println!(
        "token:     {}",
        if settings.token.is_empty() {
            "(not logged in)"
        } else {
            "stored"
        }
    );
    let last = chrono::DateTime::from_timestamp_millis(settings.last_sync_time)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "last sync: {}",
        if settings.last_sync_time > 0 { last } else { "never".to_string() }
    );
    Ok(())
}

async fn build_engine(
    config_path: &Path,
    vault_path: &Path,
    vault_name: Option<String>,
) -> Result<(Arc<SyncEngine>, EventChannel)> {
    if !vault_path.is_dir() {
        return Err(anyhow!("vault path {} is not a directory", vault_path.display()));
    }

    let mut settings = SettingsStore::load(config_path).await?;
    let name = vault_name.or_else(|| {
        vault_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    });
    if let Some(name) = name {
        settings.settings_mut().vault = name;
    }

    let client = Arc::new(
        VaultServerClient::new(&settings.settings().server_url).context("invalid server URL")?,
    );
    let fingerprints =
        FingerprintStore::load(vault_path, vault_path.join(FINGERPRINT_FILE)).await;

    let (reporter, channel) = EventChannel::new();
    let engine = SyncEngine::new(client, vault_path, fingerprints, settings, reporter);
    Ok((Arc::new(engine), channel))
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::RefreshStarted => println!("scanning vault..."),
        SyncEvent::RefreshCompleted {
            changed,
            tracked_files,
        } => {
            if *changed {
                println!("vault scan: changes detected ({tracked_files} files tracked)");
            } else {
                println!("vault scan: no local changes ({tracked_files} files tracked)");
            }
        }
        SyncEvent::CompareStarted { catalog_size } => {
            println!("comparing {catalog_size} files with the server...");
        }
        SyncEvent::PlanReceived {
            uploads,
            downloads,
            removals,
            cloud_removals,
        } => {
            println!(
                "plan: {uploads} to upload, {downloads} to download, {removals} to remove \
                 ({cloud_removals} removed on the server)"
            );
        }
        SyncEvent::UploadProgress { uploaded, total } => {
            println!("uploading {uploaded}/{total}");
        }
        SyncEvent::DownloadProgress { downloaded, total } => {
            println!("downloading {downloaded}/{total}");
        }
        SyncEvent::RemoveProgress { removed, total } => {
            println!("removed {removed}/{total} local files");
        }
        SyncEvent::Interrupted { phase } => println!("interrupted while {phase}"),
        SyncEvent::LoginExpired => println!("⚠️ login expired"),
        SyncEvent::DownloadFailed { path } => println!("⚠️ download of {path} failed"),
        SyncEvent::Warning { message } => println!("⚠️ {message}"),
        SyncEvent::NothingToDo => {}
        SyncEvent::Completed {
            uploaded,
            downloaded,
            removed,
        } => {
            println!("done: {uploaded} uploaded, {downloaded} downloaded, {removed} removed");
        }
        SyncEvent::Failed { phase, error } => println!("❌ failed while {phase}: {error}"),
    }
}
