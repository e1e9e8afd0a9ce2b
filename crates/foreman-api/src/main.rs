//! foreman-api binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use foreman_api::{serve, AppState, Config};
use foreman_core::init_logging;
use foreman_engine::providers::{HttpAgentProvider, HttpAuditorOracle, HttpVcsProvider};
use foreman_engine::Engine;
use foreman_registry::RegistryStore;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(config.log_format);
    tracing::info!(?config, "starting foreman-api");

    let store = match RegistryStore::open(&config.database_path).await {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(error = %err, path = %config.database_path, "failed to open registry");
            return ExitCode::FAILURE;
        }
    };

    let auditor = Arc::new(HttpAuditorOracle::new(
        config.auditor_url.clone(),
        config.auditor_api_key.clone(),
    ));
    let agents = Arc::new(HttpAgentProvider::new(
        config.agents_url.clone(),
        config.agents_api_key.clone(),
    ));
    let vcs = Arc::new(HttpVcsProvider::new(
        config.vcs_url.clone(),
        config.vcs_token.clone(),
    ));

    let engine = Engine::new(store, auditor, agents, vcs, config.engine.clone());
    let state = AppState {
        engine,
        webhook_secret: config.webhook_secret.clone(),
    };

    if let Err(err) = serve(config.bind_addr, state).await {
        tracing::error!(error = %err, "server exited with an error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
