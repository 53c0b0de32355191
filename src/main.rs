//! HTTP server for the story game.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;

use story_stream::config::AppConfig;
use story_stream::observability::{init_tracing, redact, DefaultMetricsCollector, LogConfig};
use story_stream::{
    build_router, AppState, GameService, GameStore, GenerationEngine, MemoryGameStore,
    ObjectMatch, PostgresGameStore, StoryError, StoryResult, ZhipuClient,
};

#[derive(Parser)]
#[command(name = "story-stream", about = "Streaming backend for the story game")]
struct Cli {
    /// Address to listen on (overrides STORY_BIND_ADDR)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Model name (overrides ZHIPU_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Object matching: first_non_greedy or balanced
    #[arg(long)]
    object_match: Option<String>,

    /// Keep games in memory even if a database is configured
    #[arg(long, env = "STORY_MEMORY_STORE")]
    memory: bool,

    /// Log filter directive (overrides STORY_LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) -> StoryResult<()> {
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(model) = &self.model {
            config.model.model = model.clone();
        }
        if let Some(value) = &self.object_match {
            config.generation.object_match = ObjectMatch::parse(value).ok_or_else(|| {
                StoryError::configuration(format!("Invalid --object-match: {}", value))
            })?;
        }
        Ok(())
    }

    fn log_config(&self, base: LogConfig) -> LogConfig {
        let mut log = base;
        if let Some(level) = &self.log_level {
            log.filter = level.clone();
        }
        if self.log_json {
            log.json = true;
        }
        log
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let log = match &config {
        Ok(config) => cli.log_config(config.logging.clone()),
        Err(_) => cli.log_config(LogConfig::from_env()),
    };
    if let Err(e) = init_tracing(&log) {
        eprintln!("failed to initialise logging: {e}");
        std::process::exit(1);
    }

    let mut config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(kind = e.kind(), "failed to load config: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = cli.apply(&mut config) {
        tracing::error!("invalid arguments: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(config, cli.memory).await {
        tracing::error!(kind = e.kind(), "{}", redact(&e.to_string()));
        std::process::exit(1);
    }
}

async fn open_store(config: &AppConfig, force_memory: bool) -> StoryResult<Arc<dyn GameStore>> {
    match &config.database {
        Some(database) if !force_memory => {
            tracing::info!(host = %database.host, database = %database.database, "using PostgreSQL store");
            let store = PostgresGameStore::new(database)?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        _ => {
            tracing::warn!("using in-memory store; games are lost on restart");
            Ok(Arc::new(MemoryGameStore::new()))
        }
    }
}

async fn run(config: AppConfig, force_memory: bool) -> StoryResult<()> {
    tracing::info!(
        model = %config.model.model,
        base_url = %config.model.base_url,
        object_match = ?config.generation.object_match,
        temperature = config.generation.sampling.temperature,
        top_p = config.generation.sampling.top_p,
        "config loaded"
    );

    let metrics = Arc::new(DefaultMetricsCollector::new());
    let model = Arc::new(ZhipuClient::from_config(&config.model)?);
    let engine = GenerationEngine::new(model, config.generation).with_metrics(metrics.clone());
    let store = open_store(&config, force_memory).await?;

    let service = Arc::new(GameService::new(engine, store));
    let app = build_router(AppState::new(service, metrics));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| {
            StoryError::configuration(format!("failed to bind {}: {}", config.bind_addr, e))
        })?;

    tracing::info!(addr = %config.bind_addr, "story-stream listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StoryError::Network {
            message: format!("server error: {}", e),
            status_code: None,
        })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("cannot listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
