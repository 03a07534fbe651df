use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_fusion::{
    addon::AddonFetcher,
    config::Config,
    database::{Database, repositories::{CacheRepository, UserRepository}},
    debrid::PlaybackResolver,
    fetch::FetchClient,
    lock,
    models::UserConfig,
    orchestrator::Orchestrator,
    playback::{CredentialBox, MetadataStore},
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "stream-fusion")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Stream aggregation middleware for media-player addon providers")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Path to a user configuration document served by default
    #[arg(short, long)]
    user_config: Option<String>,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("stream_fusion={}", cli.log_level).into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    info!(base_url = %config.server.base_url, "configuration loaded");

    let database = match config.storage.database_uri.as_deref() {
        Some(uri) => Some(Database::connect(uri).await?),
        None => None,
    };

    let lock_backend = lock::backend_from_config(
        config.storage.redis_uri.as_deref(),
        database.as_ref(),
    )
    .await
    .context("failed to initialize the lock backend")?;

    let fetch_client = Arc::new(
        FetchClient::new(config.outbound.clone(), config.server.clone())
            .context("failed to construct the outbound HTTP client")?,
    );
    let fetcher = Arc::new(AddonFetcher::new(fetch_client, lock_backend.clone()));

    let secret = config
        .server
        .internal_secret
        .clone()
        .unwrap_or_else(|| {
            warn!("no internal secret configured, playback links use an ephemeral key");
            uuid::Uuid::new_v4().to_string()
        });
    let credentials = Arc::new(CredentialBox::new(&secret));

    let cache_repository = database
        .as_ref()
        .map(|db| CacheRepository::new(db.connection.clone()));
    let metadata_store = Arc::new(MetadataStore::new(
        config.storage.builtin_playback_link_validity,
        cache_repository.clone(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        fetcher,
        config.limits.clone(),
        config.services.clone(),
        credentials.clone(),
        metadata_store.clone(),
        config.outbound.fetch_parallelism,
    ));

    // Service bindings register here; deployments without any rely on
    // upstream addons that resolve debrid URLs themselves
    let resolver = Arc::new(PlaybackResolver::new(
        lock_backend,
        Vec::new(),
        config.outbound.debrid_parallelism,
    ));

    let default_user = match cli.user_config.as_deref() {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read user config '{path}'"))?;
            serde_json::from_str::<UserConfig>(&raw)
                .with_context(|| format!("failed to parse user config '{path}'"))?
        }
        None => UserConfig::default(),
    };

    if let (Some(db), interval) = (database.as_ref(), config.storage.prune_interval) {
        spawn_prune_task(
            UserRepository::new(db.connection.clone()),
            cache_repository.clone(),
            config.storage.prune_max_days,
            interval,
        );
    }

    let state = AppState {
        orchestrator,
        resolver,
        credentials,
        metadata_store,
        config: Arc::new(config.clone()),
        default_user: Arc::new(default_user),
    };

    let server = WebServer::new(config.server.host.clone(), config.server.port, state);
    server.run().await
}

/// Periodically prune stale users and expired cache rows
fn spawn_prune_task(
    users: UserRepository,
    cache: Option<CacheRepository>,
    max_days: u32,
    interval: std::time::Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match users.prune_stale(max_days).await {
                Ok(0) => {}
                Ok(pruned) => info!(pruned, "pruned stale users"),
                Err(error) => warn!(%error, "user pruning failed"),
            }
            if let Some(cache) = &cache {
                if let Err(error) = cache.prune_expired().await {
                    warn!(%error, "cache pruning failed");
                }
            }
        }
    });
}
