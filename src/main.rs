use std::sync::Arc;

use media_fetch::{
    ApiError, AppState, ServerConfig, YtDlpExtractor, build_router, files::ensure_download_dir,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "media_fetch=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let mut config = ServerConfig::from_env()?;

    ensure_download_dir(&config.download_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not create download directory {:?}: {error}",
                config.download_dir
            ))
        })?;
    config.download_dir = tokio::fs::canonicalize(&config.download_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not resolve download directory {:?}: {error}",
                config.download_dir
            ))
        })?;
    info!("Downloads are stored in {:?}", config.download_dir);

    if config.expose_error_details {
        warn!("EXPOSE_ERROR_DETAILS is on: internal error text will be sent to clients.");
    }
    if config.allowed_origins.is_none() {
        info!("ALLOWED_ORIGINS not set; accepting requests from any origin.");
    }

    let extractor = YtDlpExtractor::new(config.yt_dlp_bin.clone(), config.download_timeout);
    let addr = config.bind_addr.clone();
    let app = build_router(AppState::new(config, Arc::new(extractor)));

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|error| ApiError::internal(format!("Could not bind {addr}: {error}")))?;

    info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {error}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
