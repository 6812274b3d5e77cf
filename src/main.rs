//! # Malayalam Transcriber - Main Application Entry Point
//!
//! HTTP service that accepts an uploaded audio recording, transcribes it with
//! a Whisper model (Malayalam by default) and returns display-ready text.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, config.toml, environment)
//! - **state**: Shared application state and metrics
//! - **handlers**: `POST /upload` and `POST /transcribe`, plus route table
//! - **health**: Health check and metrics endpoints
//! - **middleware**: Request id, logging and metrics per request
//! - **storage**: Transient on-disk copies of uploads
//! - **transcription**: Lazily-loaded speech engine behind a typed adapter
//! - **audio**: File decoding and resampling for the engine
//! - **formatting**: Transcript to HTML-friendly text
//! - **error**: Error types and their HTTP responses

mod audio;
mod config;
mod device;
mod error;
mod formatting;
mod handlers;
mod health;
mod middleware;
mod state;
mod storage;
mod transcription;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use state::AppState;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{Transcriber, TranscriberSettings, WhisperLoader};

#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing();

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        model = %config.models.whisper_model,
        language = %config.models.language,
        translate = config.models.translate,
        "Configuration loaded"
    );

    let settings = TranscriberSettings::from_config(&config)?;
    let transcriber = Arc::new(Transcriber::new(Arc::new(WhisperLoader), settings));
    let app_state = AppState::new(config.clone(), Arc::clone(&transcriber));

    app_state
        .store
        .ensure_dir()
        .await
        .with_context(|| format!("failed to create upload directory {}", config.upload.dir))?;

    if config.models.preload {
        info!("Preloading speech model in the background");
        tokio::spawn(async move {
            if let Err(e) = transcriber.ensure_loaded().await {
                warn!(error = %e, "Model preload failed, the first request will retry");
            }
        });
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware executes in reverse order for responses
            .wrap(handlers::cors())
            .wrap(middleware::RequestTelemetry)
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Console logging controlled by `RUST_LOG`.
///
/// Defaults to `malayalam_transcriber=debug,actix_web=info` when unset.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "malayalam_transcriber=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on SIGTERM or SIGINT (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
