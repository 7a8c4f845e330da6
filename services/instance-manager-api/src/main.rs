pub mod app_state;
pub mod dto;
pub mod handlers;
pub mod routes;
pub mod validators;

use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use shared::Config;
use tokio::signal;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    shared::telemetry::load_dotenv();
    let config = Config::init().await?;
    shared::telemetry::init_tracing("instance_manager_api");

    let cdf_schema = load_cdf_schema(&config).await;
    let state = app_state::AppState::init(&config, cdf_schema).await?;
    tokio::spawn({
        let heartbeat = state.heartbeat.clone();
        async move { heartbeat.run_health_checker().await }
    });

    let app = routes::get_routes()
        .with_state(state)
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
        .layer(
            TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        );

    info!(address = %config.server_address, "instance-manager-api listening");
    let listener = tokio::net::TcpListener::bind(config.server_address).await?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn load_cdf_schema(config: &Config) -> Option<serde_json::Value> {
    let path = config.ctd_directory.join("_cdf.schema.json");
    let raw = tokio::fs::read_to_string(&path).await.ok()?;
    serde_json::from_str(&raw).ok()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
