//! HTTP+SSE Frontend (C8). Grounded in
//! `examples/other_examples/09ab0f10_webdesserts-obsidian-memory__crates-memory-src-main.rs.rs`
//! for the axum bootstrap shape: `SharedState` built once, graceful
//! shutdown racing `ctrl_c` against SIGTERM.

pub mod routes_misc;
pub mod routes_query;
pub mod routes_sessions;
pub mod routes_settings;
pub mod sse;
pub mod state;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use state::SharedState;

pub fn build_router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/sessions/init", post(routes_sessions::init_session))
        .route("/sessions/observations", post(routes_sessions::observe))
        .route("/sessions/summarize", post(routes_sessions::summarize))
        .route("/sessions/{id}", delete(routes_sessions::delete_session))
        .route("/observations", get(routes_query::list_observations))
        .route("/summaries", get(routes_query::list_summaries))
        .route("/prompts", get(routes_query::list_prompts))
        .route("/observations/batch", post(routes_query::batch_observations))
        .route("/search", get(routes_query::search))
        .route("/search/prompts", get(routes_query::search_prompts))
        .route("/timeline", get(routes_query::timeline))
        .route("/projects", get(routes_misc::list_projects))
        .route("/projects/diagnostics", get(routes_misc::projects_diagnostics))
        .route("/settings", get(routes_settings::get_settings).put(routes_settings::put_settings))
        .route("/health", get(routes_misc::health))
        .route("/stats", get(routes_misc::stats))
        .route("/ollama/models", get(routes_misc::ollama_models))
        .route("/events", get(sse::events))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve, racing `ctrl_c` against SIGTERM for graceful shutdown
/// (spec §5, SPEC_FULL.md §D "Graceful shutdown draining").
pub async fn serve(state: Arc<SharedState>, host: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!(host, port, "worker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;
    Ok(())
}

async fn shutdown_signal(state: Arc<SharedState>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, cancelling active sessions");
    state.scheduler.cancel_all().await;
    crate::lockfile::release();
}
