use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use model3d_watcher::app_state::AppState;
use model3d_watcher::config::AppConfig;
use model3d_watcher::routes;
use model3d_watcher::services::finalize::FinalizeWatcher;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        api_base = %config.model_api_base,
        artifacts_dir = %config.artifacts_dir.display(),
        state_dir = %config.state_dir.display(),
        credentials = config.model_api_key.is_some(),
        "Initializing model3d-watcher"
    );

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    routes::metrics::describe();

    let bind_addr = config.bind_addr.clone();
    let state = AppState::from_config(config).expect("Failed to build HTTP client");

    if state.config.finalize_watcher_enabled {
        let watcher = FinalizeWatcher::new(
            state.store.clone(),
            &state.config.artifacts_dir,
            &state.config.publish_base_url,
            Duration::from_secs(state.config.finalize_stable_secs),
        );
        tokio::spawn(watcher.run(state.orchestrator.shutdown_token()));
    }

    let orchestrator = state.orchestrator.clone();
    let app = routes::router(state, Some(Arc::new(prometheus_handle)));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down, cancelling active runs");
            orchestrator.shutdown();
        })
        .await
        .expect("Server error");
}
