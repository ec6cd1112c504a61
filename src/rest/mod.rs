// rest/mod.rs — Public REST API server.
//
// Axum HTTP server, one resource path plus health:
//
//   GET    /api/v1/streaks          single record (?id=) or all records
//   POST   /api/v1/streaks          create
//   PUT    /api/v1/streaks?id=      replace supplied fields
//   PATCH  /api/v1/streaks          increment and recompute
//   GET    /api/v1/health

pub mod routes;

use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/v1/health", get(routes::health::health))
        .route(
            "/api/v1/streaks",
            get(routes::streaks::get_streaks)
                .post(routes::streaks::create_streak)
                .put(routes::streaks::replace_streak)
                .patch(routes::streaks::increment_streak),
        )
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Resolves when a shutdown signal is received; in-flight requests drain
/// before `axum::serve` returns.
///
/// On Unix we listen for SIGTERM *and* Ctrl-C.
/// On other platforms we listen for Ctrl-C only.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
    info!("shutdown signal received — draining requests and stopping REST server");
}
