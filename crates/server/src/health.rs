use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tallyho_db::{DbPool, Store};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    store: Store,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub store: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, store: Store) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, store })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let store = store_check(&state.store).await;
    let ready = database.status == "ready" && store.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        store,
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

async fn store_check(store: &Store) -> HealthCheck {
    match store.system().version().await {
        Ok(Some(version)) => {
            HealthCheck { status: "ready", detail: format!("schema version {version}") }
        }
        Ok(None) => HealthCheck { status: "degraded", detail: "schema version missing".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("store read failed: {error}") }
        }
    }
}
