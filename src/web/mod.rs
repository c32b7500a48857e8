//! Web server module.

mod handlers;

pub use handlers::*;

use crate::db::StatusStore;
use crate::notify::Notifier;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StatusStore>,
    pub notifier: Arc<Notifier>,
}

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/status/history", get(handlers::handle_history))
        .route("/incidents", get(handlers::handle_incidents))
        .route(
            "/push/subscribe",
            post(handlers::handle_subscribe).delete(handlers::handle_unsubscribe),
        )
        .route("/push/vapid-key", get(handlers::handle_vapid_key))
        .route("/test/alert", post(handlers::handle_test_alert))
        .route("/healthz", get(handlers::handle_healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}

/// Web server for campus-status.
pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    pub fn new(port: u16, store: Arc<dyn StatusStore>, notifier: Arc<Notifier>) -> Self {
        Self {
            port,
            state: AppState { store, notifier },
        }
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = router(self.state.clone());

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
