mod handlers;
mod metrics;
mod routes;

use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use verdict_common::Config;
use verdict_core::{
    FileProblemCatalog, Judge0Client, Orchestrator, OrchestratorSettings, ProblemCatalog,
    RedisSubmissionStore, SessionRegistry, SubmissionStore,
};

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub sessions: SessionRegistry,
    pub catalog: Arc<dyn ProblemCatalog>,
    pub store: Arc<dyn SubmissionStore>,
    pub start_time: std::time::Instant,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();
    info!("Verdict API booting...");

    metrics::init_metrics();
    info!("Metrics registry initialized");

    let config = Config::from_env();

    let backend = Judge0Client::new(&config).context("Failed to build judge HTTP client")?;
    info!(
        judge_url = %config.judge_url,
        batch = config.judge_batch,
        "Judge backend configured"
    );

    let store = RedisSubmissionStore::connect(&config.redis_url)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;
    info!("Connected to Redis: {}", config.redis_url);

    let catalog = FileProblemCatalog::load(&config.problems_path).with_context(|| {
        format!("Failed to load problem catalog from {}", config.problems_path)
    })?;

    let store: Arc<dyn SubmissionStore> = Arc::new(store);
    let orchestrator = Orchestrator::new(
        Arc::new(backend),
        OrchestratorSettings::from_config(&config),
    )
    .with_store(store.clone());

    let state = Arc::new(AppState {
        orchestrator,
        sessions: SessionRegistry::new(),
        catalog: Arc::new(catalog),
        store,
        start_time: std::time::Instant::now(),
    });

    let app = Router::new().merge(routes::routes()).with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
