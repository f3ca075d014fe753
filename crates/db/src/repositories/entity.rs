use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use approvo_core::approvals::EntityStatusUpdate;
use approvo_core::domain::approval::{ApprovalStatus, EntityType};

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp, RepositoryError};

/// Writes the final approval outcome onto the business entity. Runs on the
/// connection of the decision transaction, so a failure rolls the decision
/// back with it.
#[async_trait]
pub trait EntityStatusUpdater: Send + Sync {
    async fn set_entity_status(
        &self,
        conn: &mut SqliteConnection,
        update: &EntityStatusUpdate,
    ) -> Result<(), RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityStatusRecord {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub status: String,
    pub approval_status: ApprovalStatus,
    pub approved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

pub const ENTITY_STATUS_APPROVED: &str = "APPROVED";
pub const ENTITY_STATUS_CANCELLED: &str = "CANCELLED";

/// Keeps entity outcomes in the `entity_approval_status` table.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqlEntityStatusUpdater;

#[async_trait]
impl EntityStatusUpdater for SqlEntityStatusUpdater {
    async fn set_entity_status(
        &self,
        conn: &mut SqliteConnection,
        update: &EntityStatusUpdate,
    ) -> Result<(), RepositoryError> {
        let (status, approved_at) = match update.status {
            ApprovalStatus::Approved => (ENTITY_STATUS_APPROVED, Some(format_timestamp(update.at))),
            ApprovalStatus::Rejected => (ENTITY_STATUS_CANCELLED, None),
            ApprovalStatus::Pending => {
                return Err(RepositoryError::Decode(format!(
                    "entity `{}` cannot be moved back to PENDING",
                    update.entity_id
                )))
            }
        };

        sqlx::query(
            "INSERT INTO entity_approval_status (entity_type, entity_id, status, approval_status,
                                                 approved_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                 status = excluded.status,
                 approval_status = excluded.approval_status,
                 approved_at = excluded.approved_at,
                 updated_at = excluded.updated_at",
        )
        .bind(update.entity_type.as_str())
        .bind(&update.entity_id)
        .bind(status)
        .bind(update.status.as_str())
        .bind(approved_at)
        .bind(format_timestamp(update.at))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

pub async fn find_entity_status(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<Option<EntityStatusRecord>, RepositoryError> {
    let row = sqlx::query(
        "SELECT entity_type, entity_id, status, approval_status, approved_at, updated_at
         FROM entity_approval_status
         WHERE entity_type = ? AND entity_id = ?",
    )
    .bind(entity_type.as_str())
    .bind(entity_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let approval_raw = row.try_get::<String, _>("approval_status")?;
    let approval_status = ApprovalStatus::parse(&approval_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown entity approval status `{approval_raw}`"))
    })?;

    Ok(Some(EntityStatusRecord {
        entity_type,
        entity_id: row.try_get("entity_id")?,
        status: row.try_get("status")?,
        approval_status,
        approved_at: parse_optional_timestamp("approved_at", row.try_get("approved_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    }))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use approvo_core::approvals::EntityStatusUpdate;
    use approvo_core::domain::approval::{ApprovalStatus, EntityType};

    use super::{find_entity_status, EntityStatusUpdater, SqlEntityStatusUpdater};
    use crate::repositories::test_support::setup_pool;

    fn update(status: ApprovalStatus) -> EntityStatusUpdate {
        EntityStatusUpdate {
            entity_type: EntityType::Purchase,
            entity_id: "po-1".to_owned(),
            status,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn approval_sets_approved_status_and_timestamp() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");

        SqlEntityStatusUpdater
            .set_entity_status(&mut conn, &update(ApprovalStatus::Approved))
            .await
            .expect("update");

        let record = find_entity_status(&mut conn, EntityType::Purchase, "po-1")
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(record.status, "APPROVED");
        assert_eq!(record.approval_status, ApprovalStatus::Approved);
        assert!(record.approved_at.is_some());
    }

    #[tokio::test]
    async fn rejection_cancels_the_entity() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");

        SqlEntityStatusUpdater
            .set_entity_status(&mut conn, &update(ApprovalStatus::Rejected))
            .await
            .expect("update");

        let record = find_entity_status(&mut conn, EntityType::Purchase, "po-1")
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(record.status, "CANCELLED");
        assert_eq!(record.approval_status, ApprovalStatus::Rejected);
        assert_eq!(record.approved_at, None);

        assert!(SqlEntityStatusUpdater
            .set_entity_status(&mut conn, &update(ApprovalStatus::Pending))
            .await
            .is_err());
    }
}
