use axum::{extract::State, response::Json};

use crate::services::{PoolStats, SessionPool};

/// Current session pool occupancy
#[utoipa::path(
    get,
    path = "/api/pool",
    responses(
        (status = 200, description = "Pool statistics", body = PoolStats),
    ),
    tag = "Pool"
)]
pub async fn handle_pool_stats(State(pool): State<SessionPool>) -> Json<PoolStats> {
    Json(pool.stats())
}
