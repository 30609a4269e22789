//! Engram MCP server entrypoint.
//!
//! Wires the memory engine to the stdio transport. All logging goes to
//! stderr; stdout carries protocol frames only.

mod protocol;
mod server;
mod state;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use engram_core::{
    ConsentRegistry, Embedder, EmbeddingCache, EngramConfig, MemoryStore, VectorStore,
};

use crate::protocol::stdio::StdioTransport;
use crate::server::McpServer;
use crate::state::AppState;

#[derive(Parser)]
#[command(
    name = "engram-mcp",
    version,
    about = "Semantic memory MCP server for AI assistants"
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serve from an ephemeral in-process store instead of Qdrant.
    #[arg(long)]
    in_memory: bool,

    /// Current project name, used as the default for project-scoped
    /// retrieval.
    #[arg(long)]
    project: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => EngramConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngramConfig::default(),
    };
    let config = Arc::new(config);

    // stdout belongs to the protocol.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        "starting engram-mcp v{} (read_only={})",
        env!("CARGO_PKG_VERSION"),
        config.read_only_mode
    );

    let embedder = build_embedder(&config)?;
    let store = build_store(&config, cli.in_memory, embedder.dimensions()).await?;
    let consent = Arc::new(ConsentRegistry::open(consent_path())?);

    let state = Arc::new(AppState::build(
        config,
        store,
        embedder,
        consent,
        cli.project,
    ));
    let server = McpServer::new(state.clone());

    StdioTransport::new()
        .run(server)
        .await
        .context("stdio transport failed")?;

    tracing::info!("stdin closed, shutting down");
    if let Err(e) = state.memory.close().await {
        tracing::warn!("store close failed: {e}");
    }
    Ok(())
}

fn build_embedder(config: &EngramConfig) -> Result<Arc<Embedder>> {
    let cache = if config.embedding_cache_enabled {
        let ttl = Duration::from_secs(u64::from(config.embedding_cache_ttl_days) * 86_400);
        Some(Arc::new(
            EmbeddingCache::open(&config.resolved_cache_path(), ttl)
                .context("opening embedding cache")?,
        ))
    } else {
        None
    };

    #[cfg(feature = "embeddings")]
    {
        let backend = Arc::new(
            engram_core::FastembedBackend::new(None).context("initializing embedding model")?,
        );
        Ok(Arc::new(Embedder::new(backend, cache)))
    }
    #[cfg(not(feature = "embeddings"))]
    {
        let _ = cache;
        anyhow::bail!("built without the 'embeddings' feature; no embedding backend available");
    }
}

async fn build_store(
    config: &EngramConfig,
    in_memory: bool,
    dimensions: usize,
) -> Result<Arc<dyn VectorStore>> {
    if in_memory {
        tracing::warn!("serving from an ephemeral in-process store; data will not persist");
        return Ok(Arc::new(MemoryStore::new()));
    }

    #[cfg(feature = "qdrant")]
    {
        let store = engram_core::QdrantStore::connect(
            &config.qdrant_url,
            &config.qdrant_collection_name,
            dimensions,
            config.pool_size,
            Duration::from_secs(config.pool_acquire_timeout_secs),
            config.operation_timeout(),
        )
        .await
        .with_context(|| format!("connecting to qdrant at {}", config.qdrant_url))?;
        Ok(Arc::new(store))
    }
    #[cfg(not(feature = "qdrant"))]
    {
        let _ = dimensions;
        anyhow::bail!(
            "built without the 'qdrant' feature; pass --in-memory or rebuild with \
             default features"
        );
    }
}

fn consent_path() -> PathBuf {
    if let Some(dirs) = directories::ProjectDirs::from("ai", "engram", "engram") {
        return dirs.data_dir().join("cross_project_consent.json");
    }
    PathBuf::from(".engram/cross_project_consent.json")
}
