//! Citeflow gateway — the server entry point.
//!
//! Loads `citeflow.toml` and the profile catalog, builds the model tiers,
//! retriever, and strategy set once, then serves the HTTP API. A bad
//! profile catalog fails the boot, never a request.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use citeflow_config::{AppConfig, ProfileCatalog};
use citeflow_gateway::{router, GatewayState, InMemoryDocumentStore, InMemoryHistory};
use citeflow_orchestrator::{HttpAssistantBackend, StrategySet, Utf8TextExtraction};
use citeflow_retrieval::{InMemoryIndex, KnowledgeRetriever};

#[derive(Parser)]
#[command(
    name = "citeflow",
    about = "Citeflow — multi-profile RAG chat backend",
    version,
    author
)]
struct Cli {
    /// Path to the runtime configuration file
    #[arg(short, long, default_value = "citeflow.toml")]
    config: PathBuf,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)?;
    let catalog = ProfileCatalog::load(&config.profiles_path)?;

    let (tiers, embedder) = citeflow_completion::build_from_config(&config.completion)?;

    let mut retriever = KnowledgeRetriever::new(embedder);
    for profile in catalog.profiles() {
        if let Some(rag) = &profile.rag_settings {
            retriever.register(Arc::new(InMemoryIndex::new(&rag.index_name)));
        }
    }

    let strategies = StrategySet::new(
        Arc::new(tiers),
        Arc::new(retriever),
        Arc::new(HttpAssistantBackend::new()?),
        Arc::new(Utf8TextExtraction),
        config.completion.temperature,
    );

    let state = Arc::new(GatewayState {
        catalog,
        strategies,
        history: Arc::new(InMemoryHistory::new()),
        documents: Arc::new(InMemoryDocumentStore::new()),
        start_time: chrono::Utc::now(),
    });

    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{}:{port}", config.server.host);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(addr = %addr, profiles = state.catalog.profiles().len(), "Citeflow gateway listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
