use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use medidesk_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    faq_entries: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub knowledge_base: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, faq_entries: usize) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, faq_entries })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "medidesk-server runtime initialized".to_string(),
        },
        database,
        knowledge_base: knowledge_base_check(state.faq_entries),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

// An empty corpus still serves traffic; every question goes to the fallback.
fn knowledge_base_check(faq_entries: usize) -> HealthCheck {
    match faq_entries {
        0 => HealthCheck {
            status: "degraded",
            detail: "FAQ corpus is empty; answers come from the fallback responder".to_string(),
        },
        count => HealthCheck { status: "ready", detail: format!("{count} FAQ entries loaded") },
    }
}
