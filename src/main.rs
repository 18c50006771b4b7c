//! Forest server entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use forest::adapters::mcp::{StdioServer, ToolRouter};
use forest::domain::ports::{EmbeddingService, KvStore, VectorIndex};
use forest::infrastructure::config::ConfigLoader;
use forest::infrastructure::kv::FileKvStore;
use forest::infrastructure::logging;
use forest::infrastructure::vector::{
    HashEmbeddingService, MemoryVectorIndex, SqliteVectorIndex, DEFAULT_DIMENSION,
};
use forest::services::{
    ExpansionAgent, HtaEngine, HtaStore, IntelligenceBridge, JobFuture, MemorySync,
    OnboardingService, PipelinePresenter, ProjectService, Session, StrategyEvolver, Supervisor,
    TaskSelector,
};

#[derive(Parser)]
#[command(name = "forest", about = "Learning-plan orchestration server", version)]
struct Cli {
    /// Data root override (same effect as FOREST_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Load configuration from a specific file instead of forest.yaml
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load().context("Failed to load configuration")?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let _log_guard = logging::init(&config.logging);
    tracing::info!(data_dir = %config.data_dir.display(), "forest starting");

    let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(&config.data_dir));
    let embedder: Arc<dyn EmbeddingService> =
        Arc::new(HashEmbeddingService::new(DEFAULT_DIMENSION));

    let vectors: Arc<dyn VectorIndex> = match config.vector_provider.as_str() {
        "memory" => Arc::new(MemoryVectorIndex::new(embedder.dimension())),
        _ => {
            let db_path = config.data_dir.join("vectors.sqlite");
            match SqliteVectorIndex::open(&db_path, embedder.dimension()).await {
                Ok(index) => Arc::new(index),
                Err(e) => {
                    tracing::warn!(error = %e, "vector backend unavailable, using in-memory index");
                    Arc::new(MemoryVectorIndex::new(embedder.dimension()))
                }
            }
        }
    };

    let bridge = Arc::new(IntelligenceBridge::new(Duration::from_millis(
        config.llm_timeout_ms,
    )));
    let engine = Arc::new(HtaEngine::new(bridge.clone()));
    let hta_store = Arc::new(HtaStore::new(
        kv.clone(),
        vectors,
        embedder,
        engine,
    ));
    let projects = Arc::new(ProjectService::new(kv.clone()));
    let onboarding = Arc::new(OnboardingService::new(
        kv.clone(),
        projects.clone(),
        hta_store.clone(),
    ));
    let selector = Arc::new(TaskSelector::new(
        hta_store.vectors().clone(),
        hta_store.embedder().clone(),
    ));
    let evolver = Arc::new(StrategyEvolver::new(hta_store.clone()));
    let presenter = Arc::new(PipelinePresenter::new(selector.clone(), evolver.clone()));
    let memory_sync = Arc::new(MemorySync::new(hta_store.clone(), onboarding.clone()));

    let session = Arc::new(Session::new(config.read_only));
    if let Some(active) = projects.active_project_id().await? {
        session.set_active_project(Some(active)).await;
    }

    let expansion = Arc::new(ExpansionAgent::new(
        session.clone(),
        projects.clone(),
        hta_store.clone(),
        config.expansion.min_tasks,
        config.expansion.debug,
    ));

    let supervisor = Supervisor::new(Duration::from_secs(10));
    supervisor.add(
        "hta_expansion",
        Duration::from_millis(config.expansion.interval_ms),
        expansion.clone().into_job(),
    );
    {
        let bridge = bridge.clone();
        supervisor.add("bridge_expiry", Duration::from_secs(30), move || {
            let bridge = bridge.clone();
            Box::pin(async move {
                let expired = bridge.expire_stale().await;
                if expired > 0 {
                    tracing::debug!(expired, "dropped stale intelligence requests");
                }
                Ok(())
            }) as JobFuture
        });
    }
    supervisor.start();

    let router = Arc::new(ToolRouter::new(
        session,
        kv,
        projects,
        onboarding,
        hta_store,
        selector,
        presenter,
        evolver,
        memory_sync,
        bridge.clone(),
        expansion,
    ));

    let server = StdioServer::new(router, bridge);
    let outcome = server.run().await;

    supervisor.stop().await;
    tracing::info!("forest stopped");
    outcome
}
