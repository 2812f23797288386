//! HTTP surface of the lesson progress service.
//!
//! # Endpoint
//! - `POST /updateProgress` with `Authorization: Bearer <id-token>` and, unless
//!   the server runs in development mode, `X-Attestation: <token>`.
//! - Body: JSON object with any of `lastCompletedLesson` (integer) and
//!   `progressPercent` (integer, 0–100).
//! - 200 `{"success": true}` on commit; every other status carries
//!   `{"error": "..."}`.
//!
//! # Configuration
//! Read from `PROGRESS_*` environment variables, see [`config::Config`].
//!
//! Log verbosity follows `RUST_LOG`.
//! ```sh
//! RUST_LOG=info PROGRESS_DEV_TOKENS=dev-token=dev-user cargo run -p app -- serve --dev
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::any,
};
use thiserror::Error;
use tokio::{net::TcpListener, signal::ctrl_c};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use config::Config;
use routes::{X_ATTESTATION, update_progress_handler};
use state::AppState;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Install the global `fmt` subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, X_ATTESTATION])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/updateProgress", any(update_progress_handler))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until Ctrl+C or SIGTERM.
///
/// # Errors
///
/// Returns `ServerError` if the address cannot be bound or the server fails.
pub async fn serve(config: &Config, state: Arc<AppState>) -> Result<(), ServerError> {
    let address = config.address();
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?;
    info!("Server running on {address}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(err) => {
                error!(error = %err, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                error!(error = %err, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
