//! HTTP/WebSocket surface: thin `axum` wiring over the Query Surface and
//! Realtime Broker. No routing or doc generation beyond the fixed contract
//! — no Swagger/OpenAPI.

pub mod envelope;
pub mod handlers;
mod middleware;
mod routes;
mod ws;

use std::sync::Arc;

use axum::Router;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::broker::RealtimeBroker;
use crate::query::QuerySurface;

#[derive(Clone)]
pub struct AppState {
    pub query: Arc<QuerySurface>,
    pub broker: Arc<RealtimeBroker>,
}

pub fn create_app(query: Arc<QuerySurface>, broker: Arc<RealtimeBroker>) -> Router {
    let state = AppState { query, broker };
    let cors = CorsLayer::permissive();

    Router::new()
        .merge(routes::routes(state))
        .layer(axum::middleware::from_fn(middleware::correlation_id))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
}
