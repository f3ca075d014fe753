use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;

use approvo_core::domain::approval::ApprovalRequestId;
use approvo_core::events::OutboundEvent;

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp, parse_u32, RepositoryError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Dispatching,
    Delivered,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatching => "dispatching",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "dispatching" => Some(Self::Dispatching),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutboxRecord {
    pub id: String,
    pub request_id: ApprovalRequestId,
    pub event: OutboundEvent,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Called inside the transaction that produced the events, so they only
/// become visible to the dispatcher once the state change is committed.
pub async fn enqueue(
    conn: &mut SqliteConnection,
    events: &[OutboundEvent],
    now: DateTime<Utc>,
) -> Result<usize, RepositoryError> {
    for event in events {
        let payload = serde_json::to_string(event)
            .map_err(|error| RepositoryError::Decode(format!("outbox payload: {error}")))?;
        sqlx::query(
            "INSERT INTO approval_outbox (id, request_id, event_kind, payload_json, status,
                                          attempts, created_at)
             VALUES (?, ?, ?, ?, 'pending', 0, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&event.request_id().0)
        .bind(event.kind())
        .bind(payload)
        .bind(format_timestamp(now))
        .execute(&mut *conn)
        .await?;
    }

    Ok(events.len())
}

pub async fn list_pending(
    conn: &mut SqliteConnection,
    limit: u32,
) -> Result<Vec<OutboxRecord>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, request_id, payload_json, status, attempts, last_error, created_at,
                processed_at
         FROM approval_outbox
         WHERE status = 'pending'
         ORDER BY created_at ASC, rowid ASC
         LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(record_from_row).collect()
}

/// Moves a row from pending to dispatching. Returns `false` when another
/// dispatcher got there first.
pub async fn claim(conn: &mut SqliteConnection, id: &str) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_outbox
         SET status = 'dispatching', attempts = attempts + 1
         WHERE id = ? AND status = 'pending'",
    )
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_delivered(
    conn: &mut SqliteConnection,
    id: &str,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    finish(conn, id, OutboxStatus::Delivered, None, now).await
}

/// Failed rows stay failed; delivery is attempted once.
pub async fn mark_failed(
    conn: &mut SqliteConnection,
    id: &str,
    error: &str,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    finish(conn, id, OutboxStatus::Failed, Some(error), now).await
}

async fn finish(
    conn: &mut SqliteConnection,
    id: &str,
    status: OutboxStatus,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_outbox
         SET status = ?, last_error = ?, processed_at = ?
         WHERE id = ? AND status = 'dispatching'",
    )
    .bind(status.as_str())
    .bind(error)
    .bind(format_timestamp(now))
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound { entity: "dispatching outbox row", id: id.to_owned() });
    }
    Ok(())
}

pub async fn count_by_status(
    conn: &mut SqliteConnection,
    status: OutboxStatus,
) -> Result<u64, RepositoryError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM approval_outbox WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(&mut *conn)
        .await?;
    u64::try_from(count)
        .map_err(|_| RepositoryError::Decode(format!("negative outbox count: {count}")))
}

pub async fn list_for_request(
    conn: &mut SqliteConnection,
    request_id: &ApprovalRequestId,
) -> Result<Vec<OutboxRecord>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, request_id, payload_json, status, attempts, last_error, created_at,
                processed_at
         FROM approval_outbox
         WHERE request_id = ?
         ORDER BY created_at ASC, rowid ASC",
    )
    .bind(&request_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(record_from_row).collect()
}

fn record_from_row(row: &SqliteRow) -> Result<OutboxRecord, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = OutboxStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown outbox status `{status_raw}`")))?;
    let payload = row.try_get::<String, _>("payload_json")?;
    let event = serde_json::from_str::<OutboundEvent>(&payload)
        .map_err(|error| RepositoryError::Decode(format!("invalid outbox payload: {error}")))?;

    Ok(OutboxRecord {
        id: row.try_get("id")?,
        request_id: ApprovalRequestId(row.try_get("request_id")?),
        event,
        status,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
        last_error: row.try_get("last_error")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        processed_at: parse_optional_timestamp("processed_at", row.try_get("processed_at")?)?,
    })
}
