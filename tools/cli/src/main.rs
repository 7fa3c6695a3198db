//! NoteSync CLI - manage journal entries and sync them with a snapshot store.

mod config;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zeroize::Zeroizing;

use notesync_common::{Passphrase, UserId};
use notesync_replica::{LocalReplica, RecordStore, Replica, SqliteRecordStore};
use notesync_snapshot::Entry;
use notesync_storage::{
    create_default_registry, AuthorizationHandler, AuthorizationResponse, ProviderKind,
    SnapshotStore,
};
use notesync_sync::{
    JsonFileMetadataStore, Resolution, ScheduleConfig, StaticNetwork, SyncEngine, SyncOutcome,
    SyncScheduler, TriggerOptions,
};

use crate::config::{base_dir, default_config_path, CliConfig};

const PASSPHRASE_ENV: &str = "NOTESYNC_PASSPHRASE";

#[derive(Parser)]
#[command(name = "notesync")]
#[command(about = "NoteSync - offline-first journal sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: <config dir>/notesync/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured user.
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Override the configured provider (memory, local, gdrive).
    #[arg(long, global = true)]
    provider: Option<ProviderKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync now.
    Sync {
        /// Settle a conflict: "push" keeps local data, "pull" takes the remote.
        #[arg(short, long)]
        resolve: Option<Resolution>,
    },

    /// Show sync state, local data summary and the latest remote snapshot.
    Status,

    /// Sign in to the configured provider.
    Signin,

    /// Sign out and forget stored credentials.
    Signout,

    /// Forget sync history and pending requests. Records are kept.
    Reset {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },

    /// List sync requests queued while offline.
    Queue,

    /// Run the background scheduler until interrupted.
    Watch,

    /// Manage journal entries.
    #[command(subcommand)]
    Entry(EntryCommand),

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum EntryCommand {
    /// Create or overwrite an entry.
    Add {
        /// Entry key (default: random).
        #[arg(short, long)]
        key: Option<String>,

        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        body: String,

        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long)]
        mood: Option<String>,
    },

    /// List live entries, newest first.
    List,

    /// Delete an entry, leaving a tombstone for other devices.
    Delete { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Completions { shell } = cli.command {
        return cmd_completions(shell);
    }

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let mut config = CliConfig::load(&config_path)?;
    if let Some(user) = &cli.user {
        config.user = user.clone();
    }
    if let Some(provider) = cli.provider {
        config.provider = provider;
    }
    debug!("Using config {}", config_path.display());

    let app = App::open(config)?;

    match cli.command {
        Commands::Sync { resolve } => cmd_sync(&app, resolve).await,
        Commands::Status => cmd_status(&app).await,
        Commands::Signin => cmd_signin(&app).await,
        Commands::Signout => cmd_signout(&app).await,
        Commands::Reset { yes } => cmd_reset(&app, yes).await,
        Commands::Queue => cmd_queue(&app).await,
        Commands::Watch => cmd_watch(&app).await,
        Commands::Entry(command) => cmd_entry(&app, command).await,
        Commands::Completions { .. } => Ok(()),
    }
}

/// Everything a command needs, wired once.
struct App {
    config: CliConfig,
    user: UserId,
    replica: Arc<Replica<SqliteRecordStore>>,
    store: Arc<dyn SnapshotStore>,
    engine: Arc<SyncEngine>,
}

impl App {
    fn open(config: CliConfig) -> Result<Self> {
        let base = base_dir()?;
        std::fs::create_dir_all(&base)
            .with_context(|| format!("Failed to create {}", base.display()))?;

        let user = UserId::new(config.user.clone()).context("Invalid user")?;

        let database = config.database_path(&base);
        let records = SqliteRecordStore::open(&database)
            .with_context(|| format!("Failed to open database {}", database.display()))?;
        let replica = Arc::new(Replica::new(records));

        let registry = create_default_registry(Some(Arc::new(BrowserAuthorization)));
        let store = registry
            .resolve(config.provider, config.resolved_provider_config(&base))
            .with_context(|| format!("Failed to configure provider '{}'", config.provider))?;

        let metadata = Arc::new(JsonFileMetadataStore::new(config.state_path(&base)));

        let mut engine = SyncEngine::new(
            user.clone(),
            Arc::clone(&store),
            replica.clone(),
            metadata,
            Arc::new(StaticNetwork::online()),
            config.sync.clone(),
        );
        if config.encrypt {
            engine = engine.with_passphrase(read_passphrase()?);
        }

        Ok(Self {
            config,
            user,
            replica,
            store,
            engine: Arc::new(engine),
        })
    }
}

/// Passphrase from the environment, else an interactive prompt.
fn read_passphrase() -> Result<Passphrase> {
    let value = match std::env::var(PASSPHRASE_ENV) {
        Ok(value) => Zeroizing::new(value),
        Err(_) => Zeroizing::new(
            rpassword::prompt_password("Snapshot passphrase: ")
                .context("Failed to read passphrase")?,
        ),
    };
    Passphrase::new(value.as_str()).context("Passphrase cannot be empty")
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read input")?;
    Ok(line.trim().to_string())
}

/// Opens the consent page and asks the user to paste the redirect URL.
struct BrowserAuthorization;

#[async_trait]
impl AuthorizationHandler for BrowserAuthorization {
    async fn authorize(&self, url: &str) -> notesync_common::Result<AuthorizationResponse> {
        println!("Opening your browser to sign in. If it does not open, visit:\n\n  {}\n", url);
        if let Err(e) = open::that(url) {
            warn!("Could not open browser: {}", e);
        }

        let pasted = tokio::task::spawn_blocking(|| {
            prompt_line("Paste the URL you were redirected to: ")
        })
        .await
        .map_err(|e| notesync_common::Error::AuthFailed(e.to_string()))?
        .map_err(|e| notesync_common::Error::AuthFailed(e.to_string()))?;

        parse_redirect(&pasted)
    }
}

/// Extract `code` and `state` from a pasted OAuth redirect URL.
fn parse_redirect(pasted: &str) -> notesync_common::Result<AuthorizationResponse> {
    let redirect = url::Url::parse(pasted).map_err(|e| {
        notesync_common::Error::AuthFailed(format!("Not a valid URL: {}", e))
    })?;

    let mut code = None;
    let mut state = None;
    for (key, value) in redirect.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => {
                return Err(notesync_common::Error::AuthFailed(format!(
                    "Authorization denied: {}",
                    value
                )))
            }
            _ => {}
        }
    }

    match (code, state) {
        (Some(code), Some(state)) => Ok(AuthorizationResponse { code, state }),
        _ => Err(notesync_common::Error::AuthFailed(
            "Redirect URL is missing code or state".to_string(),
        )),
    }
}

async fn cmd_sync(app: &App, resolve: Option<Resolution>) -> Result<()> {
    let mut options = TriggerOptions::manual();
    if let Some(resolution) = resolve {
        options = options.with_resolution(resolution);
    }

    let outcome = app
        .engine
        .trigger_sync(options)
        .await
        .context("Sync failed")?;

    match &outcome {
        SyncOutcome::Conflict(details) => {
            println!("Conflict: both this device and the remote changed since the last sync.");
            println!(
                "  Last sync:     {}",
                details
                    .last_sync_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
            println!(
                "  Local:         {} entries, {} images (changed {})",
                details.local.entry_count,
                details.local.image_count,
                details
                    .local_changed_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default()
            );
            println!(
                "  Remote:        {} entries, {} images (uploaded {})",
                details.remote.properties.entry_count,
                details.remote.properties.image_count,
                details.remote.modified_time.to_rfc3339()
            );
            println!("\nRun `notesync sync --resolve push` or `notesync sync --resolve pull`.");
        }
        other => println!("Sync: {}", other),
    }
    Ok(())
}

async fn cmd_status(app: &App) -> Result<()> {
    let metadata = app.engine.metadata().await?;
    let summary = app.replica.data_summary(&app.user).await?;
    let pending = app.engine.pending_queue_count().await?;

    println!("User:      {}", app.user);
    println!("Provider:  {}", app.config.provider);
    println!("Device:    {}", metadata.device_id);
    println!(
        "Last sync: {}",
        metadata
            .last_sync_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "Local:     {} entries, {} images (hash {})",
        summary.entry_count,
        summary.image_count,
        &summary.content_hash[..12.min(summary.content_hash.len())]
    );
    println!("Pending:   {}", pending);

    app.store.initialize().await?;
    if !app.store.is_authenticated() {
        println!("Remote:    not signed in");
        return Ok(());
    }
    match app.store.latest_snapshot_metadata().await {
        Ok(Some(remote)) => println!(
            "Remote:    {} ({} entries, {} images, {} bytes{}, {})",
            remote.id,
            remote.properties.entry_count,
            remote.properties.image_count,
            remote.size,
            if remote.properties.encrypted { ", encrypted" } else { "" },
            remote.modified_time.to_rfc3339()
        ),
        Ok(None) => println!("Remote:    no snapshots"),
        Err(e) => println!("Remote:    unavailable ({})", e),
    }
    Ok(())
}

async fn cmd_signin(app: &App) -> Result<()> {
    app.store.initialize().await?;
    if app.store.is_authenticated() {
        println!("Already signed in to {}.", app.store.name());
        return Ok(());
    }
    app.store.sign_in().await.context("Sign-in failed")?;
    println!("Signed in to {}.", app.store.name());
    Ok(())
}

async fn cmd_signout(app: &App) -> Result<()> {
    app.store.sign_out().await.context("Sign-out failed")?;
    println!("Signed out of {}.", app.store.name());
    Ok(())
}

async fn cmd_reset(app: &App, yes: bool) -> Result<()> {
    if !yes {
        let answer = prompt_line("Forget sync history and pending requests? [y/N] ")?;
        if !matches!(answer.as_str(), "y" | "Y" | "yes") {
            println!("Aborted.");
            return Ok(());
        }
    }

    let metadata = app.engine.reset().await?;
    println!("Sync history cleared. New device id: {}", metadata.device_id);
    Ok(())
}

async fn cmd_queue(app: &App) -> Result<()> {
    let pending = app.engine.pending_requests().await?;
    if pending.is_empty() {
        println!("No queued sync requests.");
        return Ok(());
    }

    println!("{} queued sync request(s):", pending.len());
    for request in pending {
        let resolution = request
            .options
            .resolution
            .map(|r| format!(" (resolve {})", r))
            .unwrap_or_default();
        println!(
            "  {}  {}{}",
            request.timestamp.to_rfc3339(),
            request.id,
            resolution
        );
    }
    Ok(())
}

async fn cmd_watch(app: &App) -> Result<()> {
    app.engine.initialize().await?;

    let (scheduler, handle) = SyncScheduler::new(ScheduleConfig::from(&app.config.sync));
    let runner = tokio::spawn(handle.run(app.engine.clone()));

    let mut states = app.engine.watch();
    info!(
        "Watching {} (periodic: {:?}), press Ctrl-C to stop",
        app.user, app.config.sync.periodic_interval_secs
    );

    // Replays anything queued by earlier offline runs.
    scheduler.notify_online().await?;

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                match &state.last_error {
                    Some(error) => println!("[{}] {} ({})", Utc::now().format("%H:%M:%S"), state.status, error),
                    None => println!("[{}] {}", Utc::now().format("%H:%M:%S"), state.status),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping.");
                break;
            }
        }
    }

    scheduler.shutdown().await;
    runner.await.context("Scheduler task panicked")?;
    Ok(())
}

async fn cmd_entry(app: &App, command: EntryCommand) -> Result<()> {
    match command {
        EntryCommand::Add {
            key,
            title,
            body,
            tags,
            mood,
        } => {
            let now = Utc::now();
            let key = key.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            let mut entry = match app.replica.store().get_entry(&app.user, &key).await? {
                Some(existing) if !existing.is_deleted() => existing,
                _ => Entry::new(key.clone(), "", "", now),
            };
            entry.title = title;
            entry.body = body;
            entry.tags = tags;
            entry.mood = mood;

            app.replica.save_entry(&app.user, entry, now).await?;
            println!("Saved entry {}", key);
        }
        EntryCommand::List => {
            let entries = app.replica.list_entries(&app.user).await?;
            if entries.is_empty() {
                println!("No entries.");
            }
            for entry in entries {
                let date = entry
                    .entry_date
                    .map(|d| d.to_string())
                    .unwrap_or_default();
                let tags = if entry.tags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", entry.tags.join(", "))
                };
                println!("{}  {}  {}{}", entry.key, date, entry.title, tags);
            }
        }
        EntryCommand::Delete { key } => {
            app.replica
                .delete_entry(&app.user, &key, Utc::now())
                .await
                .with_context(|| format!("Failed to delete entry {}", key))?;
            println!("Deleted entry {}", key);
        }
    }
    Ok(())
}

fn cmd_completions(shell: Shell) -> Result<()> {
    let mut command = Cli::command();
    clap_complete::generate(shell, &mut command, "notesync", &mut io::stdout());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sync_resolve_flag() {
        let cli = Cli::try_parse_from(["notesync", "sync", "--resolve", "pull"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sync {
                resolve: Some(Resolution::Pull)
            }
        ));
        assert!(Cli::try_parse_from(["notesync", "sync", "--resolve", "merge"]).is_err());
    }

    #[test]
    fn test_parse_redirect() {
        let response =
            parse_redirect("http://127.0.0.1:8085/callback?code=abc&state=xyz&scope=s").unwrap();
        assert_eq!(response.code, "abc");
        assert_eq!(response.state, "xyz");

        assert!(parse_redirect("http://127.0.0.1:8085/callback?error=access_denied").is_err());
        assert!(parse_redirect("http://127.0.0.1:8085/callback?code=abc").is_err());
        assert!(parse_redirect("not a url").is_err());
    }
}
