use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imageflow_core::config::Config;
use imageflow_core::index::{MetadataIndex, RedisIndex, migrate_json_dir};
use imageflow_core::reconcile::Reconciler;
use imageflow_core::storage::open_store;
use imageflow_core::transcode::init_encoder_runtime;
use imageflow_server::{AppState, build_router};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "imageflow-server")]
#[command(about = "Self-hosted image delivery service with WebP/AVIF transcoding")]
struct Args {
    /// Server port (overrides SERVER_PORT)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides SERVER_HOST)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (the default)
    Serve,
    /// Report store/index orphans, optionally removing them
    Reconcile {
        /// Delete the orphan side instead of only reporting it
        #[arg(long)]
        apply: bool,
    },
    /// One-shot migration of per-record JSON metadata files into the index
    Migrate {
        /// Directory holding the legacy `<id>.json` files
        #[arg(long)]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imageflow_server=info,imageflow_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env().context("invalid configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    let config = Arc::new(config);

    info!(
        storage = config.storage.type_name(),
        host = %config.server.host,
        port = config.server.port,
        "configuration loaded"
    );

    let store = open_store(&config.storage)
        .await
        .context("failed to open the object store")?;
    let index: Arc<dyn MetadataIndex> = Arc::new(
        RedisIndex::connect(
            &config.redis.url(),
            config.redis.effective_prefix(config.storage.type_name()),
            config.public_url_base(),
        )
        .await
        .context("failed to connect to the metadata index")?,
    );
    index.ping().await.context("metadata index did not answer a ping")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, store, index).await,
        Command::Reconcile { apply } => {
            let reconciler = Reconciler::new(store, index);
            let report = reconciler.scan().await?;
            if report.is_clean() {
                info!("store and index agree, nothing to reconcile");
                return Ok(());
            }
            for key in &report.orphan_blobs {
                info!(key, "orphan blob (no record)");
            }
            for id in &report.broken_records {
                info!(id, "broken record (original blob missing)");
            }
            if apply {
                reconciler.apply(&report).await?;
                info!("orphans removed");
            } else {
                warn!(
                    orphan_blobs = report.orphan_blobs.len(),
                    broken_records = report.broken_records.len(),
                    "run with --apply to remove the orphan side"
                );
            }
            Ok(())
        }
        Command::Migrate { dir } => {
            let migrated = migrate_json_dir(&dir, index.as_ref()).await?;
            info!(migrated, "migration finished");
            Ok(())
        }
    }
}

async fn serve(
    config: Arc<Config>,
    store: Arc<dyn imageflow_core::storage::ObjectStore>,
    index: Arc<dyn MetadataIndex>,
) -> Result<()> {
    // The encoders share one process-global thread pool; size it before
    // the first worker can touch them.
    init_encoder_runtime(config.processing.worker_threads);

    let state = AppState::assemble(config.clone(), store, index);

    let sweeper_task = state
        .sweeper
        .clone()
        .spawn_interval(config.processing.cleanup_interval_minutes);

    let app = build_router(state.clone());
    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "ImageFlow server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    sweeper_task.abort();
    state.pool.shutdown().await;
    info!("server stopped");
    Ok(())
}
