pub mod health;
pub mod recalculate;
pub mod signature;
pub mod webhooks;

use crate::orchestration::RecalcDispatcher;
use crate::store::OrderStore;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: RecalcDispatcher,
    pub store: Arc<dyn OrderStore>,
    pub webhook_secret: Arc<str>,
}

impl AppState {
    pub fn new(dispatcher: RecalcDispatcher, store: Arc<dyn OrderStore>, webhook_secret: &str) -> Self {
        Self {
            dispatcher,
            store,
            webhook_secret: Arc::from(webhook_secret),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/webhooks/orders/create", post(webhooks::order_created))
        .route("/webhooks/orders/cancelled", post(webhooks::order_cancelled))
        .route("/webhooks/refunds/create", post(webhooks::refund_created))
        .route("/v1/recalculate", post(recalculate::recalculate))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
