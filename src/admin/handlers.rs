use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;
use crate::pool::HostStats;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub in_flight: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        in_flight: state.in_flight(),
    })
}

/// Per-origin pool occupancy, sorted by origin.
pub async fn get_pool(State(state): State<AppState>) -> Json<Vec<HostStats>> {
    Json(state.pool.stats())
}
