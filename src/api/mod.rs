//! HTTP surface.
//!
//! Public endpoints serve the webhook and contribution queries; `/admin`
//! endpoints require the configured bearer token and are disabled without
//! one.

mod error;
mod routes;

pub use error::{ApiError, ApiResult, ErrorResponse};

use crate::pipeline::Pipeline;
use crate::reconcile::Reconciler;
use crate::webhook::WebhookAuthenticator;
use axum::routing::{get, post, put};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Registration pipeline.
    pub pipeline: Pipeline,
    /// Reconciliation jobs.
    pub reconciler: Reconciler,
    /// Webhook authentication.
    pub authenticator: Arc<WebhookAuthenticator>,
    /// Admin bearer token; admin endpoints are disabled when `None`.
    pub admin_token: Option<Arc<str>>,
    /// Default backfill size for manual runs.
    pub backfill_batch: usize,
}

impl AppState {
    /// Assemble handler state.
    #[must_use]
    pub fn new(
        pipeline: Pipeline,
        authenticator: WebhookAuthenticator,
        admin_token: Option<String>,
        backfill_batch: usize,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(pipeline.clone()),
            pipeline,
            authenticator: Arc::new(authenticator),
            admin_token: admin_token.filter(|t| !t.is_empty()).map(Arc::from),
            backfill_batch,
        }
    }
}

/// Build the router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/webhook", post(routes::webhook))
        .route("/contributions", get(routes::list_contributions))
        .route("/contributions/:id", get(routes::get_contribution))
        .route("/claim/mark", post(routes::mark_claim))
        .route("/repos/schema", get(routes::get_repo_schema))
        .route("/admin/repos/schema", put(routes::put_repo_schema))
        .route("/admin/bindings", post(routes::bind_identity))
        .route("/admin/reconcile/backfill", post(routes::run_backfill))
        .route("/admin/reconcile/claims", post(routes::run_claim_sync))
        .route("/admin/inspect", get(routes::inspect))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `state` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> crate::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
