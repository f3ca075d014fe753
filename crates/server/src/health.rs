use approvo_db::repositories::outbox::{self, OutboxStatus};
use approvo_db::DbPool;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
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
    pub outbox: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn spawn(bind_address: &str, port: u16, db_pool: DbPool) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";
    let outbox = if ready {
        outbox_check(&state.db_pool).await
    } else {
        HealthCheck { status: "unknown", detail: "database unavailable".to_string() }
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "approvo-server runtime initialized".to_string(),
        },
        database,
        outbox,
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

// A backlog is informational; it never flips overall readiness. Rows stuck
// in `dispatching` are reported separately since no dispatcher will pick them
// up again.
async fn outbox_check(pool: &DbPool) -> HealthCheck {
    let counted = match pool.acquire().await {
        Ok(mut conn) => match outbox::count_by_status(&mut conn, OutboxStatus::Pending).await {
            Ok(pending) => outbox::count_by_status(&mut conn, OutboxStatus::Dispatching)
                .await
                .map(|dispatching| (pending, dispatching)),
            Err(error) => Err(error),
        },
        Err(error) => Err(error.into()),
    };

    match counted {
        Ok((pending, dispatching)) => HealthCheck {
            status: "ready",
            detail: format!("{pending} pending, {dispatching} dispatching events"),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("outbox query failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use approvo_db::{connect_with_settings, migrations};
    use axum::{extract::State, http::StatusCode, Json};

    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5)
            .await
            .expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.service.status, "ready");
        assert_eq!(payload.outbox.status, "ready");
        assert_eq!(payload.outbox.detail, "0 pending, 0 dispatching events");

        pool.close().await;
    }

    #[tokio::test]
    async fn outbox_check_reports_rows_stuck_in_dispatching() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5)
            .await
            .expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");
        sqlx::query(
            "INSERT INTO approval_outbox (id, request_id, event_kind, payload_json, status,
                                          attempts, created_at)
             VALUES ('ob-1', 'req-1', 'request_completed', '{}', 'dispatching', 1,
                     '2026-01-01T00:00:00.000000Z')",
        )
        .execute(&pool)
        .await
        .expect("stuck row");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.outbox.detail, "0 pending, 1 dispatching events");

        pool.close().await;
    }

    #[tokio::test]
    async fn outbox_check_degrades_without_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5)
            .await
            .expect("pool should connect");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.outbox.status, "degraded");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5)
            .await
            .expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.outbox.status, "unknown");
        assert_eq!(payload.service.status, "ready");
    }
}
