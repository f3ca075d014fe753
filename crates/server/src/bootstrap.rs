use std::sync::Arc;

use approvo_core::config::{AppConfig, ConfigError, LoadOptions};
use approvo_db::{
    connect_with_config, migrations, ApprovalService, DbPool, LoggingPostApprovalCallback,
    OutboxDispatcher,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: ApprovalService,
    pub dispatcher: OutboxDispatcher,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let service = ApprovalService::from_config(db_pool.clone(), &config.approvals);
    let dispatcher = OutboxDispatcher::sql_backed(
        db_pool.clone(),
        &config.approvals,
        Arc::new(LoggingPostApprovalCallback),
    );
    info!(
        event_name = "system.bootstrap.approvals_ready",
        correlation_id = "bootstrap",
        auto_approve_multi_role = config.approvals.auto_approve_multi_role,
        decision_max_attempts = config.approvals.decision_max_attempts,
        "approval service initialized"
    );

    Ok(Application { config, db_pool, service, dispatcher })
}

#[cfg(test)]
mod tests {
    use approvo_core::config::{ConfigOverrides, LoadOptions};
    use approvo_core::domain::approval::{Decision, UserId};
    use approvo_core::NewApprovalRequest;
    use approvo_db::DemoSeed;
    use rust_decimal::Decimal;

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_rejects_non_sqlite_urls() {
        let result = bootstrap(overrides("postgres://localhost/approvo")).await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"));
    }

    #[tokio::test]
    async fn integration_smoke_covers_startup_and_a_full_approval() {
        let app = bootstrap(overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('approval_request', 'approval_step_action', \
             'approval_history', 'approval_outbox')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("approval tables should exist after bootstrap");
        assert_eq!(table_count, 4);

        DemoSeed::load(&app.db_pool).await.expect("seed");
        let case = app
            .service
            .create_request(NewApprovalRequest {
                entity_type: "PURCHASE".to_string(),
                entity_id: "po-smoke".to_string(),
                amount: Decimal::from(1_200_000),
                requester_id: UserId("u-employee".to_string()),
                title: "Smoke purchase".to_string(),
                message: String::new(),
                priority: None,
            })
            .await
            .expect("create request");

        for approver in ["u-employee", "u-finance"] {
            app.service
                .process_decision(
                    &case.request.id,
                    &UserId(approver.to_string()),
                    Decision::Approve,
                    "smoke",
                )
                .await
                .expect("approve");
        }

        let report = app.dispatcher.dispatch_pending().await.expect("dispatch");
        assert_eq!(report.failed, 0);
        assert_eq!(report.claimed, 4);
        assert!(report.notifications >= 3);

        app.db_pool.close().await;
    }
}
