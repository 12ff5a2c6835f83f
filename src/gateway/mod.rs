//! HTTP gateway
//!
//! ```text
//! GET  /api/v1/health
//! POST /api/v1/accounts                     open account
//! GET  /api/v1/accounts                     list accounts
//! GET  /api/v1/accounts/{id}                one account
//! POST /api/v1/transfers                    execute, wait for the outcome
//! POST /api/v1/transfers/async              queue, 202 + idempotency key
//! GET  /api/v1/transfers/{idempotency_key}  journal status
//! GET  /docs                                Swagger UI
//! ```

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::transfer::CancelSignal;
pub use state::AppState;

/// Build the complete router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .route(
            "/api/v1/accounts",
            post(handlers::open_account).get(handlers::list_accounts),
        )
        .route("/api/v1/accounts/{id}", get(handlers::get_account))
        .route("/api/v1/transfers", post(handlers::create_transfer))
        .route("/api/v1/transfers/async", post(handlers::create_transfer_async))
        .route(
            "/api/v1/transfers/{idempotency_key}",
            get(handlers::get_transfer),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Serve until `shutdown` fires; in-flight requests are drained first
pub async fn run_server(
    host: &str,
    port: u16,
    state: Arc<AppState>,
    shutdown: CancelSignal,
) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    info!("Swagger UI at http://{}/docs", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Gateway stopped");
    Ok(())
}
