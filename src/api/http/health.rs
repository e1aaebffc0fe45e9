// src/api/http/health.rs
// Health/readiness/liveness probes for load balancers, following the
// teacher's three-probe shape: liveness never touches a dependency,
// readiness checks migrations ran, health checks the backing store is
// reachable.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    conversation_store: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    migrations: &'static str,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = sqlx::query("SELECT 1").fetch_one(state.store.pool()).await.is_ok();

    let response = HealthResponse {
        status: if store_ok { "healthy" } else { "unhealthy" },
        conversation_store: if store_ok { "ok" } else { "error" },
    };

    if store_ok {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// GET /ready
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let migrations_ok = sqlx::query("SELECT 1 FROM conversations LIMIT 1")
        .fetch_optional(state.store.pool())
        .await
        .is_ok();

    let response = ReadyResponse {
        status: if migrations_ok { "ready" } else { "not_ready" },
        migrations: if migrations_ok { "applied" } else { "pending" },
    };

    if migrations_ok {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// GET /live
pub async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "alive" })))
}
