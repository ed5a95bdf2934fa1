//! Squadwatch daemon and one-shot passes.
//!
//! # Usage
//!
//! ```bash
//! # One discovery pass from the first hole in the known ids
//! squadwatch --token "$TOKEN" discover
//!
//! # Refresh the 200 stalest squadrons not seen since the weekly reboot
//! squadwatch --token-url https://auth.example/token refresh --count 200 --deadline-aligned
//!
//! # Refresh a single squadron
//! squadwatch refresh --id 68879
//!
//! # Alternate refresh and discovery until stopped
//! squadwatch --webhook-url "$WEBHOOK" --metrics-port 9090 daemon --batch 100 --idle-secs 300
//! ```
//!
//! # Graceful Shutdown
//!
//! SIGINT (Ctrl+C) and SIGTERM set a shutdown flag. The current
//! fetch-upsert cycle finishes, then the running pass returns and the
//! process exits.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use metrics::gauge;
use squadwatch_core::TagCatalog;
use squadwatch_core::metrics::{init_metrics, start_metrics_server};
use squadwatch_sync::upstream::{DEFAULT_BASE_URL, DEFAULT_REQUEST_SPACING};
use squadwatch_sync::{
    DiscoveryConfig, HookRegistry, HttpUpstream, LogNotifier, NewSquadronAlert, Notifier,
    RefreshConfig, RelayPool, RemovalAlert, SnapshotStore, SquadronChangeAlert, StaticToken,
    Synchronizer, TokenEndpoint, TokenSource, UpstreamConfig, WatchConfig, WebhookNotifier,
    discover, refresh,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Squadron discovery and refresh daemon.
#[derive(Parser, Debug)]
#[command(name = "squadwatch")]
#[command(about = "Discovers and tracks upstream squadrons")]
#[command(version)]
struct Args {
    /// SQLite database path
    #[arg(long, env = "SQUADWATCH_DB", default_value = "./data/squads.sqlite")]
    db: PathBuf,

    /// JSON list of relays (proxy URLs, null for direct)
    #[arg(long, env = "SQUADWATCH_RELAYS", default_value = "./proxies.json")]
    relays: PathBuf,

    /// Tag catalog (upstream available.json)
    #[arg(long, env = "SQUADWATCH_TAGS", default_value = "./available.json")]
    tags: PathBuf,

    /// Upstream squadron API base URL
    #[arg(long, env = "SQUADWATCH_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Static bearer token
    #[arg(long, env = "SQUADWATCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Token service URL, used when no static token is given
    #[arg(long, env = "SQUADWATCH_TOKEN_URL")]
    token_url: Option<String>,

    /// Value of the `auth` header sent to the token service
    #[arg(long, env = "SQUADWATCH_TOKEN_AUTH", hide_env_values = true)]
    token_auth: Option<String>,

    /// Webhook for alerts (alerts are logged when unset)
    #[arg(long, env = "SQUADWATCH_WEBHOOK_URL", hide_env_values = true)]
    webhook_url: Option<String>,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, env = "SQUADWATCH_METRICS_PORT", default_value = "0")]
    metrics_port: u16,

    /// User tag id of squadrons to alert on
    #[arg(long, default_value = "32")]
    watched_tag: i64,

    /// Name of the watched tag in alert messages
    #[arg(long, default_value = "russian")]
    watched_label: String,

    /// New watched squadrons are announced above this member count
    #[arg(long, default_value = "5")]
    watched_min_members: i64,

    /// Minimum seconds between requests through one relay
    #[arg(long, default_value_t = DEFAULT_REQUEST_SPACING.as_secs())]
    spacing_secs: u64,

    /// Environment file loaded before reading `SQUADWATCH_*` variables
    #[arg(long, default_value = ".env")]
    dotenv: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one discovery pass
    Discover {
        /// Start this many ids past the first hole
        #[arg(long, default_value = "0")]
        offset: i64,
    },
    /// Run one refresh pass
    Refresh {
        /// Maximum squadrons to refresh
        #[arg(long, default_value = "100")]
        count: usize,

        /// Refresh only this squadron
        #[arg(long)]
        id: Option<i64>,

        /// Skip squadrons already refreshed since the weekly reboot
        #[arg(long)]
        deadline_aligned: bool,
    },
    /// Alternate refresh and discovery passes until stopped
    Daemon {
        /// Squadrons refreshed per cycle
        #[arg(long, default_value = "100")]
        batch: usize,

        /// Seconds to idle between cycles
        #[arg(long, default_value = "300")]
        idle_secs: u64,
    },
}

/// Bearer token from the command line or a token service.
enum Credentials {
    Static(StaticToken),
    Endpoint(TokenEndpoint),
}

impl TokenSource for Credentials {
    async fn bearer(&self) -> squadwatch_sync::Result<String> {
        match self {
            Self::Static(token) => token.bearer().await,
            Self::Endpoint(endpoint) => endpoint.bearer().await,
        }
    }
}

type Engine = Synchronizer<HttpUpstream<Credentials>>;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Args::parse();

    // Re-parse so env fallbacks see the file's variables
    if args.dotenv.exists() {
        dotenvy::from_path(&args.dotenv)
            .with_context(|| format!("Failed to load {}", args.dotenv.display()))?;
        args = Args::parse();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,squadwatch_sync=debug")),
        )
        .init();

    tracing::info!("Squadwatch starting...");

    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle)
            .await
            .context("Failed to start metrics server")?;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);

    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, finishing current squadron...");
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let (notifier, webhook_task) = init_notifier(&args);
    let sync = init_engine(&args, notifier)?;

    tracing::info!("Configuration:");
    tracing::info!("  Database: {}", args.db.display());
    tracing::info!("  Upstream: {}", args.base_url);
    tracing::info!("  Relays: {}", sync.upstream().pool().len());
    tracing::info!(
        "  Alerts: {}",
        if args.webhook_url.is_some() { "webhook" } else { "log" }
    );

    match args.command {
        Command::Discover { offset } => {
            discover(&sync, &DiscoveryConfig::default(), offset, &shutdown)
                .await
                .context("Discovery failed")?;
        }
        Command::Refresh {
            count,
            id,
            deadline_aligned,
        } => {
            let config = RefreshConfig {
                batch_size: count,
                deadline_aligned,
                ..Default::default()
            };
            refresh(&sync, &config, id, &shutdown, Utc::now())
                .await
                .context("Refresh failed")?;
        }
        Command::Daemon { batch, idle_secs } => {
            run_daemon(&sync, batch, Duration::from_secs(idle_secs), &shutdown).await?;
        }
    }

    // Let queued alerts go out before exiting
    drop(sync);
    if let Some(handle) = webhook_task {
        if let Err(e) = handle.await {
            tracing::warn!("Webhook task failed: {}", e);
        }
    }

    tracing::info!("Squadwatch stopped");
    Ok(())
}

fn init_notifier(args: &Args) -> (Arc<dyn Notifier>, Option<tokio::task::JoinHandle<()>>) {
    match &args.webhook_url {
        Some(url) => {
            let (notifier, handle) = WebhookNotifier::spawn(url.clone());
            (Arc::new(notifier), Some(handle))
        }
        None => (Arc::new(LogNotifier), None),
    }
}

/// Open the store, build the upstream client and register the alerts.
fn init_engine(args: &Args, notifier: Arc<dyn Notifier>) -> Result<Engine> {
    let store = Arc::new(
        SnapshotStore::open(&args.db)
            .with_context(|| format!("Failed to open database at {:?}", args.db))?,
    );

    let credentials = match (&args.token, &args.token_url) {
        (Some(token), _) => Credentials::Static(StaticToken(token.clone())),
        (None, Some(url)) => Credentials::Endpoint(
            TokenEndpoint::new(url.clone(), args.token_auth.clone())
                .context("Failed to create token client")?,
        ),
        (None, None) => bail!("Either --token or --token-url is required"),
    };

    let config = UpstreamConfig {
        base_url: args.base_url.clone(),
        request_spacing: Duration::from_secs(args.spacing_secs),
        ..Default::default()
    };
    let pool = RelayPool::load(&args.relays, config.request_spacing)
        .with_context(|| format!("Failed to load relays from {:?}", args.relays))?;
    let upstream =
        HttpUpstream::new(config, pool, credentials).context("Failed to create upstream client")?;

    let catalog = if args.tags.exists() {
        TagCatalog::load(&args.tags)
            .with_context(|| format!("Failed to load tag catalog from {:?}", args.tags))?
    } else {
        tracing::warn!(
            "No tag catalog at {}, tags will be shown by id",
            args.tags.display()
        );
        TagCatalog::new(Vec::new())
    };

    let watch = WatchConfig {
        tag: args.watched_tag,
        label: args.watched_label.clone(),
        min_members: args.watched_min_members,
    };

    let mut hooks = HookRegistry::new();
    hooks.register_on_change(NewSquadronAlert::new(watch.clone(), Arc::clone(&notifier)));
    hooks.register_on_change(SquadronChangeAlert::new(
        watch.clone(),
        Arc::new(catalog),
        Arc::clone(&notifier),
    ));
    hooks.register_on_before_delete(RemovalAlert::new(watch, notifier));

    Ok(Synchronizer::new(upstream, store, hooks))
}

/// Alternate refresh and discovery passes until shutdown.
///
/// A retryable upstream failure ends the current cycle; anything else
/// ends the daemon.
async fn run_daemon(
    sync: &Engine,
    batch: usize,
    idle: Duration,
    shutdown: &AtomicBool,
) -> Result<()> {
    gauge!("daemon_running").set(1.0);

    let refresh_config = RefreshConfig {
        batch_size: batch,
        deadline_aligned: true,
        ..Default::default()
    };
    let discovery_config = DiscoveryConfig::default();

    let mut cycles = 0usize;
    let mut refreshed = 0usize;
    let mut discovered = 0usize;
    let mut interrupted_cycles = 0usize;

    while !shutdown.load(Ordering::SeqCst) {
        cycles += 1;
        tracing::info!("Starting cycle {}", cycles);

        match refresh(sync, &refresh_config, None, shutdown, Utc::now()).await {
            Ok(stats) => refreshed += stats.synced,
            Err(e) if e.is_retryable() => {
                tracing::warn!("Refresh pass aborted: {}", e);
                interrupted_cycles += 1;
                idle_until(idle, shutdown).await;
                continue;
            }
            Err(e) => {
                gauge!("daemon_running").set(0.0);
                return Err(e).context("Refresh failed");
            }
        }

        match discover(sync, &discovery_config, 0, shutdown).await {
            Ok(stats) => discovered += stats.found,
            Err(e) if e.is_retryable() => {
                tracing::warn!("Discovery pass aborted: {}", e);
                interrupted_cycles += 1;
            }
            Err(e) => {
                gauge!("daemon_running").set(0.0);
                return Err(e).context("Discovery failed");
            }
        }

        idle_until(idle, shutdown).await;
    }

    gauge!("daemon_running").set(0.0);

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Cycles run:           {}", cycles);
    tracing::info!("Cycles interrupted:   {}", interrupted_cycles);
    tracing::info!("Squadrons refreshed:  {}", refreshed);
    tracing::info!("Squadrons discovered: {}", discovered);

    Ok(())
}

/// Sleep for `idle`, waking early on shutdown.
async fn idle_until(idle: Duration, shutdown: &AtomicBool) {
    let start = tokio::time::Instant::now();
    while start.elapsed() < idle && !shutdown.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
