//! API module
//!
//! Thin HTTP gateway in front of the ledger handlers.

pub mod middleware;
pub mod routes;

use axum::{middleware as axum_middleware, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::audit::AuditRecorder;
use crate::domain::Balance;
use crate::handlers::{DepositHandler, FailTransactionHandler, OpenAccountHandler, TransferHandler};
use crate::store::LedgerStore;

pub use routes::create_router;

/// Shared state for all routes
#[derive(Debug)]
pub struct AppState<S: LedgerStore> {
    pub store: S,
    pub transfers: TransferHandler<S>,
    pub deposits: DepositHandler<S>,
    pub accounts: OpenAccountHandler<S>,
    pub failures: FailTransactionHandler<S>,
    pub audit: AuditRecorder<S>,
}

impl<S: LedgerStore> AppState<S> {
    pub fn new(store: S, starting_balance: Balance) -> Self {
        Self {
            transfers: TransferHandler::new(store.clone()),
            deposits: DepositHandler::new(store.clone()),
            accounts: OpenAccountHandler::new(store.clone(), starting_balance),
            failures: FailTransactionHandler::new(store.clone()),
            audit: AuditRecorder::new(store.clone()),
            store,
        }
    }
}

/// Build the application router
pub fn build_router<S: LedgerStore>(state: AppState<S>) -> Router {
    let state = Arc::new(state);

    // Outermost first: context -> logging -> identity -> handler
    let api_routes = create_router::<S>().layer(
        ServiceBuilder::new()
            .layer(axum_middleware::from_fn(middleware::context_middleware))
            .layer(axum_middleware::from_fn(middleware::logging_middleware))
            .layer(axum_middleware::from_fn_with_state(
                state.clone(),
                middleware::identity_middleware::<S>,
            )),
    );

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
