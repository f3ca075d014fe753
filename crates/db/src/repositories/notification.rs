use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;

use approvo_core::domain::approval::{ApprovalPriority, ApprovalRequestId, UserId};
use approvo_core::ports::{CollaboratorError, Notification, NotificationKind, Notifier};

use super::{format_timestamp, parse_json, parse_timestamp, RepositoryError};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: ApprovalPriority,
    pub request_id: Option<ApprovalRequestId>,
    pub payload: serde_json::Value,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Stores one in-app notification row per recipient.
#[derive(Clone)]
pub struct SqlNotifier {
    pool: DbPool,
    dedup_window: Duration,
}

impl SqlNotifier {
    pub fn new(pool: DbPool, dedup_window: Duration) -> Self {
        Self { pool, dedup_window }
    }

    pub fn dedup_window(&self) -> Duration {
        self.dedup_window
    }
}

#[async_trait]
impl Notifier for SqlNotifier {
    async fn notify(&self, notification: &Notification) -> Result<usize, CollaboratorError> {
        let mut tx = self.pool.begin().await.map_err(notification_error)?;
        let delivered =
            insert_notification(&mut tx, notification, Utc::now(), self.dedup_window)
                .await
                .map_err(notification_error)?;
        tx.commit().await.map_err(notification_error)?;
        Ok(delivered)
    }
}

fn notification_error(error: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::Notification(error.to_string())
}

/// Returns the number of rows written. With `deduplicate` set, recipients
/// who already have the same kind for the same request newer than
/// `now - dedup_window` are skipped.
pub async fn insert_notification(
    conn: &mut SqliteConnection,
    notification: &Notification,
    now: DateTime<Utc>,
    dedup_window: Duration,
) -> Result<usize, RepositoryError> {
    let cutoff = format_timestamp(now - dedup_window);
    let mut delivered = 0;

    for user_id in &notification.user_ids {
        if notification.deduplicate {
            let existing: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM notification
                 WHERE user_id = ? AND kind = ? AND request_id = ? AND created_at >= ?",
            )
            .bind(&user_id.0)
            .bind(notification.kind.as_str())
            .bind(&notification.request_id.0)
            .bind(&cutoff)
            .fetch_one(&mut *conn)
            .await?;
            if existing > 0 {
                continue;
            }
        }

        sqlx::query(
            "INSERT INTO notification (id, user_id, kind, title, message, priority, request_id,
                                       payload_json, is_read, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&user_id.0)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.priority.as_str())
        .bind(&notification.request_id.0)
        .bind(notification.payload.to_string())
        .bind(format_timestamp(now))
        .execute(&mut *conn)
        .await?;
        delivered += 1;
    }

    Ok(delivered)
}

/// Newest first.
pub async fn list_for_user(
    conn: &mut SqliteConnection,
    user_id: &UserId,
) -> Result<Vec<NotificationRecord>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, user_id, kind, title, message, priority, request_id, payload_json, is_read,
                created_at
         FROM notification
         WHERE user_id = ?
         ORDER BY created_at DESC, rowid DESC",
    )
    .bind(&user_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(record_from_row).collect()
}

fn record_from_row(row: &SqliteRow) -> Result<NotificationRecord, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = NotificationKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown notification kind `{kind_raw}`")))?;
    let priority_raw = row.try_get::<String, _>("priority")?;
    let priority = ApprovalPriority::parse(&priority_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown priority `{priority_raw}`")))?;

    Ok(NotificationRecord {
        id: row.try_get("id")?,
        user_id: UserId(row.try_get("user_id")?),
        kind,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        priority,
        request_id: row.try_get::<Option<String>, _>("request_id")?.map(ApprovalRequestId),
        payload: parse_json("payload_json", row.try_get("payload_json")?)?,
        is_read: row.try_get("is_read")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
