//! Read API
//!
//! Thin HTTP surface over the store: list with cursor pagination and
//! filtering, random selection, and a health probe. All correctness
//! semantics live in the store.

pub mod dto;
pub mod handlers;
pub mod middleware;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::store::ProxyStore;

/// How long in-flight responses get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub store: ProxyStore,
}

pub fn router(store: ProxyStore) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/proxies", get(handlers::get_proxies))
        .route("/proxies/random", get(handlers::get_random_proxy))
        .layer(axum::middleware::from_fn(middleware::correlation_id))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { store })
}

/// Serve until shutdown, then drain in-flight requests within the grace
/// period.
pub async fn serve(
    store: ProxyStore,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> crate::Result<()> {
    let app = router(store);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "api listening");

    let mut drain_signal = shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = drain_signal.changed().await;
    });
    let mut handle = tokio::spawn(server.into_future());

    tokio::select! {
        joined = &mut handle => {
            joined??;
            return Ok(());
        }
        _ = shutdown.changed() => {}
    }

    info!("api shutting down");
    match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
        Ok(joined) => joined??,
        Err(_) => warn!("api drain timed out"),
    }
    Ok(())
}
