//! HTTP handlers for the Query Surface's read contract.

use axum::extract::{Query, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::ApiResponse;
use super::AppState;

fn clamp_limit(limit: Option<usize>, default: usize, max: usize) -> usize {
    limit.unwrap_or(default).min(max)
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub timestamp: String,
}

pub async fn health(State(state): State<AppState>) -> Response {
    let snapshot = state.query.health();
    let body = HealthBody {
        status: snapshot.status,
        timestamp: Utc::now().to_rfc3339(),
    };
    ApiResponse::ok(serde_json::json!({ "health": snapshot, "status": body.status, "timestamp": body.timestamp }))
}

#[derive(Debug, Deserialize)]
pub struct ConsolidatedQuery {
    pub limit: Option<usize>,
    pub since: Option<DateTime<Utc>>,
}

pub async fn consolidated_events(
    State(state): State<AppState>,
    Query(params): Query<ConsolidatedQuery>,
) -> Response {
    let limit = clamp_limit(params.limit, 100, 1000);
    match state.query.recent_consolidated(limit, params.since).await {
        Ok(events) => {
            let total_count = events.len();
            ApiResponse::ok(serde_json::json!({
                "events": events,
                "total_count": total_count,
                "timestamp": Utc::now().to_rfc3339(),
            }))
        }
        Err(e) => super::envelope::ApiErrorResponse::internal(e.to_string()),
    }
}

pub async fn weather_current(State(state): State<AppState>) -> Response {
    let snapshot = state.query.latest_weather().await;
    ApiResponse::ok(snapshot)
}

#[derive(Debug, Deserialize)]
pub struct RecentEventsQuery {
    pub limit: Option<usize>,
}

pub async fn events_recent(
    State(state): State<AppState>,
    Query(params): Query<RecentEventsQuery>,
) -> Response {
    let limit = clamp_limit(params.limit, 50, 200);
    let events = state.query.recent_business_events(limit).await;
    ApiResponse::ok(serde_json::json!({
        "events": events,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
