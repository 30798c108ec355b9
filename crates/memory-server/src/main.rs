//! CLI entry point: `memory-service server|status|export|import`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use memory_core::coordinator::{self, CoordinatorConfig};
use memory_core::embeddings::{CachedProvider, EmbeddingProvider, NeuralEmbeddingProvider};
use memory_core::storage::SqliteStore;
use memory_server::{build_router, AppState, Config, EventBus};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "memory-service", version, about = "Embedded semantic memory service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP/SSE surface in the foreground.
    Server,
    /// Report whether a direct or remote store is reachable, plus stats.
    Status,
    /// Export memories to a JSON file.
    Export {
        /// Destination file. Defaults to `<BACKUPS_PATH>/<timestamp>.json`.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Only export memories carrying this tag.
        #[arg(long)]
        tag: Option<String>,
        /// Include embedding vectors in the export (larger file).
        #[arg(long, default_value_t = false)]
        include_embeddings: bool,
    },
    /// Import memories from one or more JSON export files.
    Import {
        files: Vec<PathBuf>,
        /// Report what would happen without writing anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Report duplicate/conflict analysis only; implies --dry-run.
        #[arg(long, default_value_t = false)]
        analyze_only: bool,
        #[arg(long, default_value_t = true)]
        deduplicate: bool,
        #[arg(long, default_value_t = true)]
        add_source_tags: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();
}

async fn build_embedding_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>, anyhow::Error> {
    if config.use_portable_runtime {
        #[cfg(feature = "portable-runtime")]
        {
            let provider = memory_core::embeddings::PortableEmbeddingProvider::new().await?;
            return Ok(Arc::new(CachedProvider::new(provider)));
        }
        #[cfg(not(feature = "portable-runtime"))]
        {
            tracing::warn!("USE_PORTABLE_RUNTIME=1 but the portable-runtime feature is not compiled in, falling back");
        }
    }

    let provider = NeuralEmbeddingProvider::with_model(
        config.embedding_model_name.clone(),
        "cpu".to_string(),
        16,
    )?;
    Ok(Arc::new(CachedProvider::new(provider)))
}

async fn run_server(config: Config) -> anyhow::Result<i32> {
    let embedding = build_embedding_provider(&config).await?;
    let bus = EventBus::new(config.sse_heartbeat_interval);
    bus.spawn_heartbeat();

    let store = SqliteStore::open(config.database_path.clone(), embedding, bus.clone())?;

    #[cfg(feature = "mdns")]
    let _mdns_daemon = if config.mdns_enabled {
        memory_server::discovery::advertise("memory-service", config.http_port, false, false, env!("CARGO_PKG_VERSION"))
    } else {
        None
    };

    let state = AppState { store: Arc::new(store), bus, config: Arc::new(config.clone()), started_at: Instant::now() };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!("listening on {}", config.bind_addr());

    tokio::select! {
        result = axum::serve(listener, router.into_make_service_with_connect_info::<std::net::SocketAddr>()) => {
            result?;
            Ok(0)
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
            Ok(130)
        }
    }
}

async fn run_status(config: Config) -> anyhow::Result<i32> {
    let embedding = build_embedding_provider(&config).await?;
    let coordinator_config = CoordinatorConfig {
        port: config.http_port,
        auto_start: config.http_auto_start,
        database_path: config.database_path.clone(),
        ..Default::default()
    };

    let (mode, store) = coordinator::detect(coordinator_config, embedding, memory_core::events::null_sink()).await?;
    match store.stats().await {
        Ok(stats) => {
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "mode": format!("{mode:?}"), "stats": stats }))?);
            Ok(0)
        }
        Err(e) => {
            eprintln!("error fetching stats: {e}");
            Ok(1)
        }
    }
}

async fn run_export(config: Config, output: Option<PathBuf>, tag: Option<String>, include_embeddings: bool) -> anyhow::Result<i32> {
    let embedding = build_embedding_provider(&config).await?;
    let coordinator_config = CoordinatorConfig {
        port: config.http_port,
        auto_start: config.http_auto_start,
        database_path: config.database_path.clone(),
        ..Default::default()
    };
    let (_mode, store) = coordinator::detect(coordinator_config, embedding, memory_core::events::null_sink()).await?;

    let memories = if let Some(tag) = &tag {
        store.search_by_tag(std::slice::from_ref(tag), memory_core::TagMatchMode::Any).await?
    } else {
        store.recall(None, 1_000_000, None, None).await.into_iter().map(|r| r.memory).collect()
    };

    std::fs::create_dir_all(&config.backups_path).ok();
    let path = output.unwrap_or_else(|| {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        config.backups_path.join(format!("export-{stamp}.json"))
    });

    let hostname = hostname::get().ok().and_then(|h| h.into_string().ok()).unwrap_or_else(|| "unknown".to_string());
    memory_core::export::write_export(&path, &memories, &hostname, include_embeddings)?;
    println!("exported {} memories to {}", memories.len(), path.display());
    Ok(0)
}

async fn run_import(
    config: Config,
    files: Vec<PathBuf>,
    dry_run: bool,
    analyze_only: bool,
    deduplicate: bool,
    add_source_tags: bool,
) -> anyhow::Result<i32> {
    let embedding = build_embedding_provider(&config).await?;
    let coordinator_config = CoordinatorConfig {
        port: config.http_port,
        auto_start: config.http_auto_start,
        database_path: config.database_path.clone(),
        ..Default::default()
    };
    let (_mode, store) = coordinator::detect(coordinator_config, embedding, memory_core::events::null_sink()).await?;

    let existing: HashSet<String> = store
        .recall(None, 1_000_000, None, None)
        .await
        .into_iter()
        .map(|r| r.memory.content_hash)
        .collect();

    if analyze_only {
        let analysis = memory_core::export::analyze_import(&files, &existing);
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(0);
    }

    let stats = memory_core::export::import_from_json(&store, &files, existing, deduplicate, add_source_tags, dry_run).await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(if stats.errors > 0 { 1 } else { 0 })
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env();

    let result = match cli.command {
        Command::Server => run_server(config).await,
        Command::Status => run_status(config).await,
        Command::Export { output, tag, include_embeddings } => run_export(config, output, tag, include_embeddings).await,
        Command::Import { files, dry_run, analyze_only, deduplicate, add_source_tags } => {
            run_import(config, files, dry_run, analyze_only, deduplicate, add_source_tags).await
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    }
}
