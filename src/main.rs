#[cfg(not(test))]
use std::sync::Arc;
#[cfg(not(test))]
use std::time::Duration;

#[cfg(not(test))]
use clap::Parser;
#[cfg(not(test))]
use tracing_subscriber::EnvFilter;

#[cfg(not(test))]
use parley::config::Config;
#[cfg(not(test))]
use parley::error::Result;
#[cfg(not(test))]
use parley::factories::backend_factory::BackendFactory;
#[cfg(not(test))]
use parley::server::{self, AppState};
#[cfg(not(test))]
use parley::services::models::{ModelSelector, ModelStrategy};
#[cfg(not(test))]
use parley::services::queries::QueryService;
#[cfg(not(test))]
use parley::session::SessionRegistry;

#[cfg(not(test))]
#[derive(Parser, Debug)]
#[command(name = "parleyd")]
#[command(about = "Parley chat persistence daemon")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 7910)]
    port: u16,

    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<String>,

    #[arg(long, env = "PARLEY_DB")]
    db: Option<String>,

    #[arg(long, env = "PARLEY_PROFILE_DIR")]
    profile_dir: Option<String>,

    #[arg(long, env = "PARLEY_API_KEY")]
    api_key: Option<String>,
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,parley=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let storage = config.storage.get_or_insert_with(Default::default);
    if cli.db.is_some() {
        storage.database_path = cli.db.clone();
    }
    if cli.profile_dir.is_some() {
        storage.profile_dir = cli.profile_dir.clone();
    }
    let models_config = config.models.get_or_insert_with(Default::default);
    if cli.api_key.is_some() {
        models_config.api_key = cli.api_key.clone();
    }
    let models_config = models_config.clone();
    let timeout = config
        .storage
        .as_ref()
        .and_then(|s| s.query_timeout_ms)
        .unwrap_or(10_000);

    let backend = BackendFactory::create_from_config(&config).await?;
    let queries = Arc::new(QueryService::with_timeout(
        backend,
        Duration::from_millis(timeout),
    ));
    let models = Arc::new(ModelSelector::resolve(
        ModelStrategy::Live,
        &models_config,
        None,
    ));
    if !models.is_usable() {
        tracing::warn!("no model credential configured, chat requests will be rejected");
    }
    let sessions = match config.server.as_ref().and_then(|s| s.session_ttl_minutes) {
        Some(minutes) => Arc::new(SessionRegistry::new(Duration::from_secs(minutes * 60))),
        None => Arc::new(SessionRegistry::with_default_ttl()),
    };

    let state = AppState {
        queries,
        models,
        sessions,
    };

    let host = config
        .server
        .as_ref()
        .and_then(|s| s.host.clone())
        .unwrap_or_else(|| cli.host.clone());
    let port = config
        .server
        .as_ref()
        .and_then(|s| s.port)
        .unwrap_or(cli.port);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down");
    };
    server::run_with_shutdown(&host, port, state, shutdown).await
}

#[cfg(test)]
fn main() {}
