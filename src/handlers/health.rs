use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::db;
use crate::state::AppState;

// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = {
        let conn = db::lock(&state.db);
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
    };

    if db_ok {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
    } else {
        tracing::error!("health check failed: database unreachable");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "degraded" })),
        )
    }
}
