//! Route table for the fixed HTTP contract.

use axum::routing::get;
use axum::Router;

use super::{handlers, ws, AppState};

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/vehicles/consolidated", get(handlers::consolidated_events))
        .route("/api/weather/current", get(handlers::weather_current))
        .route("/api/events/recent", get(handlers::events_recent))
        .route("/ws", get(ws::upgrade))
        .with_state(state)
}
