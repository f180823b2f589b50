//! HTTP surface over the analysis engine.
//!
//! Thin by design: handlers validate input, call into the adapters and
//! engine crates, and map failures to JSON problem responses.

pub mod error;
pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use devscope_adapters::config::Config;
use devscope_engine::ChatBackend;
use std::net::SocketAddr;
use std::sync::Arc;

/// Shared state handed to every handler.
pub struct AppState {
    pub config: Config,
    pub backend: Arc<dyn ChatBackend>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/clone-repo/", post(handlers::clone_repo))
        .route("/list-repos/", get(handlers::list_repos))
        .route("/analyze/", post(handlers::analyze))
        .route("/get-analysis/{author}", get(handlers::get_analysis))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
