use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use approvo_core::domain::approval::{
    ApprovalRequestId, HistoryAction, HistoryEntry, HistoryEntryId, UserId,
};

use super::{format_timestamp, parse_json, parse_timestamp, RepositoryError};

/// History is append-only; entries are never updated or removed.
pub async fn append(
    conn: &mut SqliteConnection,
    entries: &[HistoryEntry],
) -> Result<(), RepositoryError> {
    for entry in entries {
        sqlx::query(
            "INSERT INTO approval_history (id, request_id, user_id, action, comments,
                                           metadata_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id.0)
        .bind(&entry.request_id.0)
        .bind(&entry.user_id.0)
        .bind(entry.action.as_str())
        .bind(&entry.comments)
        .bind(entry.metadata.to_string())
        .bind(format_timestamp(entry.created_at))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Oldest first; entries written in the same instant keep insertion order.
pub async fn list_for_request(
    conn: &mut SqliteConnection,
    request_id: &ApprovalRequestId,
) -> Result<Vec<HistoryEntry>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, request_id, user_id, action, comments, metadata_json, created_at
         FROM approval_history
         WHERE request_id = ?
         ORDER BY created_at ASC, rowid ASC",
    )
    .bind(&request_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

fn entry_from_row(row: &SqliteRow) -> Result<HistoryEntry, RepositoryError> {
    let action_raw = row.try_get::<String, _>("action")?;
    let action = HistoryAction::parse(&action_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown history action `{action_raw}`")))?;

    Ok(HistoryEntry {
        id: HistoryEntryId(row.try_get("id")?),
        request_id: ApprovalRequestId(row.try_get("request_id")?),
        user_id: UserId(row.try_get("user_id")?),
        action,
        comments: row.try_get("comments")?,
        metadata: parse_json("metadata_json", row.try_get("metadata_json")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use serde_json::json;

    use approvo_core::approvals::{ApprovalEngine, NewApprovalRequest};
    use approvo_core::domain::approval::{
        ApprovalRequestId, HistoryAction, HistoryEntry, HistoryEntryId, UserId,
    };
    use approvo_core::domain::workflow::{
        ApprovalModule, StepTemplate, StepTemplateId, WorkflowId, WorkflowTemplate,
    };

    use super::{append, list_for_request};
    use crate::repositories::request::insert_case;
    use crate::repositories::test_support::setup_pool;
    use crate::repositories::workflow::insert_workflow;

    #[tokio::test]
    async fn entries_come_back_in_insertion_order_with_metadata() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");

        let workflow_id = WorkflowId("wf-sales".to_owned());
        let workflow = WorkflowTemplate {
            id: workflow_id.clone(),
            name: "Sales".to_owned(),
            module: ApprovalModule::Sales,
            min_amount: Decimal::ZERO,
            max_amount: Decimal::ZERO,
            is_active: true,
            require_director: false,
            require_finance: false,
            steps: vec![StepTemplate {
                id: StepTemplateId("wf-sales-1".to_owned()),
                workflow_id,
                step_order: 1,
                name: "Finance".to_owned(),
                approver_role: "finance".to_owned(),
                is_optional: false,
                is_parallel: false,
                time_limit_hours: 24,
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        insert_workflow(&mut conn, &workflow).await.expect("workflow");

        let now = Utc::now();
        let created = ApprovalEngine::new()
            .instantiate(
                &workflow,
                NewApprovalRequest {
                    entity_type: "sale".to_owned(),
                    entity_id: "so-1".to_owned(),
                    amount: Decimal::from(100),
                    requester_id: UserId("u-1".to_owned()),
                    title: "SO-1".to_owned(),
                    message: String::new(),
                    priority: None,
                },
                now,
            )
            .expect("instantiate");
        insert_case(&mut conn, &created.case).await.expect("case");

        let request_id: ApprovalRequestId = created.case.request.id.clone();
        let mut entries = created.history.clone();
        for suffix in ["b", "a"] {
            entries.push(HistoryEntry {
                id: HistoryEntryId(format!("h-{suffix}")),
                request_id: request_id.clone(),
                user_id: UserId("u-2".to_owned()),
                action: HistoryAction::Approved,
                comments: suffix.to_owned(),
                metadata: json!({ "auto_approved": suffix == "a" }),
                created_at: now,
            });
        }
        append(&mut conn, &entries).await.expect("append");

        let stored = list_for_request(&mut conn, &request_id).await.expect("history");
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0].action, HistoryAction::Created);
        assert_eq!(stored[1].comments, "b");
        assert_eq!(stored[2].metadata["auto_approved"], json!(true));
    }
}
