pub mod context;
pub mod deploy;
pub mod dispatcher;
pub mod terminate;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{routing::get, Json, Router};
use queue_core::TaskKind;
use serde_json::json;
use shared::{AppError, Config};
use tokio::{signal, task::JoinSet};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{error, info};

use crate::context::WorkerContext;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    shared::telemetry::load_dotenv();
    let config = Config::init().await?;
    shared::telemetry::init_tracing("instance_manager_worker");

    let ctx = Arc::new(WorkerContext::init(&config).await?);
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    let dispatcher_count = if config.enable_parallel_workers { 2 } else { 1 };

    let mut set = JoinSet::new();

    for idx in 0..dispatcher_count {
        set.spawn(dispatcher::run(ctx.clone(), TaskKind::Deployment, format!("{hostname}-deploy-{idx}")));
    }
    for idx in 0..dispatcher_count {
        set.spawn(dispatcher::run(ctx.clone(), TaskKind::Termination, format!("{hostname}-terminate-{idx}")));
    }

    set.spawn({
        let heartbeat = ctx.heartbeat.clone();
        async move {
            heartbeat.run_health_checker().await;
            Ok(())
        }
    });

    set.spawn(start_health_server(config.worker_health_address));

    info!(dispatchers_per_queue = dispatcher_count, "instance-manager-worker started");

    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            set.shutdown().await;
        }
        Some(result) = set.join_next() => {
            match result {
                Ok(Ok(())) => error!("a background task exited unexpectedly"),
                Ok(Err(e)) => error!(error = %e, "background task failed"),
                Err(e) => error!(error = %e, "background task panicked"),
            }
            set.shutdown().await;
        }
    }

    info!("instance-manager-worker shutting down");
    Ok(())
}

async fn start_health_server(addr: SocketAddr) -> Result<(), AppError> {
    let app = Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "instance-manager-worker"})) }))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(tracing::Level::INFO)));

    info!(%addr, "worker health check server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
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
