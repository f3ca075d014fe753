use approvo_core::config::{AppConfig, LoadOptions};
use approvo_db::repositories::outbox::{self, OutboxStatus};
use approvo_db::{connect_with_config, DbPool};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DATABASE_CHECKS: [&str; 3] = ["database_connectivity", "approval_schema", "outbox_backlog"];

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(skipped(&DATABASE_CHECKS, "configuration did not load"));
        }
    }

    summarize(checks)
}

fn summarize(checks: Vec<DoctorCheck>) -> DoctorReport {
    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn skipped(names: &[&'static str], reason: &str) -> Vec<DoctorCheck> {
    names
        .iter()
        .map(|name| DoctorCheck {
            name: *name,
            status: CheckStatus::Skipped,
            details: format!("skipped because {reason}"),
        })
        .collect()
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let mut checks = vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
            checks.extend(skipped(&DATABASE_CHECKS[1..], "the async runtime did not start"));
            return checks;
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                let mut checks = vec![DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to connect to database: {error}"),
                }];
                checks.extend(skipped(&DATABASE_CHECKS[1..], "the database is unreachable"));
                return checks;
            }
        };

        let mut checks = vec![DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        }];
        checks.extend(check_schema(&pool).await);
        pool.close().await;
        checks
    })
}

async fn check_schema(pool: &DbPool) -> Vec<DoctorCheck> {
    let tables: Result<i64, sqlx::Error> = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'approval_outbox'",
    )
    .fetch_one(pool)
    .await;

    match tables {
        Ok(1) => {}
        Ok(_) => {
            let mut checks = vec![DoctorCheck {
                name: "approval_schema",
                status: CheckStatus::Fail,
                details: "approval tables missing; run `approvo migrate`".to_string(),
            }];
            checks.extend(skipped(&DATABASE_CHECKS[2..], "the approval schema is missing"));
            return checks;
        }
        Err(error) => {
            let mut checks = vec![DoctorCheck {
                name: "approval_schema",
                status: CheckStatus::Fail,
                details: format!("schema inspection failed: {error}"),
            }];
            checks.extend(skipped(&DATABASE_CHECKS[2..], "the schema could not be inspected"));
            return checks;
        }
    }

    let schema = DoctorCheck {
        name: "approval_schema",
        status: CheckStatus::Pass,
        details: "approval tables present".to_string(),
    };
    let counts = match pool.acquire().await {
        Ok(mut conn) => match outbox::count_by_status(&mut conn, OutboxStatus::Pending).await {
            Ok(pending) => outbox::count_by_status(&mut conn, OutboxStatus::Dispatching)
                .await
                .map(|dispatching| (pending, dispatching)),
            Err(error) => Err(error),
        },
        Err(error) => Err(error.into()),
    };
    let backlog = match counts {
        Ok((pending, dispatching)) => backlog_check(pending, dispatching),
        Err(error) => DoctorCheck {
            name: "outbox_backlog",
            status: CheckStatus::Fail,
            details: format!("outbox query failed: {error}"),
        },
    };

    vec![schema, backlog]
}

/// Rows left in `dispatching` are never picked up again, so any of them
/// fails the check.
fn backlog_check(pending: u64, dispatching: u64) -> DoctorCheck {
    if dispatching > 0 {
        return DoctorCheck {
            name: "outbox_backlog",
            status: CheckStatus::Fail,
            details: format!(
                "{pending} pending outbox events; {dispatching} stuck in dispatching need manual review"
            ),
        };
    }
    DoctorCheck {
        name: "outbox_backlog",
        status: CheckStatus::Pass,
        details: format!("{pending} pending outbox events"),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
