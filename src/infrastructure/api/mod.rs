//! Control-plane HTTP API.
//!
//! Thin façades over the stores and the Scenario Runner. Authentication and
//! rate limiting are a gateway concern, deliberately absent here.

pub mod engines;
pub mod scenarios;
pub mod state;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use state::{ApiError, AppState};

/// Assemble the full API router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(engines::router())
        .merge(scenarios::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr, "control-plane API listening");
    axum::serve(listener, app).await?;
    Ok(())
}
