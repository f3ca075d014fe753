use std::collections::HashMap;

use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqliteConnection};

use approvo_core::domain::approval::{
    ApprovalCase, ApprovalPriority, ApprovalRequest, ApprovalRequestId, ApprovalStatus,
    EntityType, StepAction, StepActionId, StepOrigin, UserId,
};
use approvo_core::domain::workflow::{ApprovalModule, StepTemplateId, WorkflowId};

use super::{
    format_timestamp, parse_decimal, parse_optional_timestamp, parse_timestamp, parse_u32,
    RepositoryError,
};

const REQUEST_COLUMNS: &str = "id, request_code, workflow_id, requester_id, entity_type,
     entity_id, amount, status, priority, request_title, request_message, reject_reason,
     active_step_id, version, completed_at, created_at, updated_at";

const STEP_ACTION_COLUMNS: &str = "id, request_id, origin, step_template_id, step_order,
     step_name, approver_role, is_optional, status, approver_id, comments, action_date,
     created_at, updated_at";

const DEFAULT_LIST_LIMIT: u32 = 50;

/// SQLite caps bound parameters per statement.
const IDS_PER_QUERY: usize = 500;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub status: Option<ApprovalStatus>,
    pub module: Option<ApprovalModule>,
    pub requester_id: Option<UserId>,
    /// Only what this user may see. The service resolves it to a
    /// [`RequestScope`] through the user directory.
    pub visible_to: Option<UserId>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// One user's view of the request list: what they raised, plus open
/// requests whose active step wants one of `step_roles`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestScope {
    pub user_id: UserId,
    pub step_roles: Vec<String>,
}

impl RequestFilter {
    fn entity_type(&self) -> Option<&'static str> {
        self.module.map(|module| match module {
            ApprovalModule::Sales => EntityType::Sale.as_str(),
            ApprovalModule::Purchase => EntityType::Purchase.as_str(),
        })
    }
}

pub async fn insert_case(
    conn: &mut SqliteConnection,
    case: &ApprovalCase,
) -> Result<(), RepositoryError> {
    let request = &case.request;
    sqlx::query(
        "INSERT INTO approval_request (id, request_code, workflow_id, requester_id, entity_type,
                                       entity_id, amount, status, priority, request_title,
                                       request_message, reject_reason, active_step_id, version,
                                       completed_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&request.id.0)
    .bind(&request.request_code)
    .bind(&request.workflow_id.0)
    .bind(&request.requester_id.0)
    .bind(request.entity_type.as_str())
    .bind(&request.entity_id)
    .bind(request.amount.to_string())
    .bind(request.status.as_str())
    .bind(request.priority.as_str())
    .bind(&request.title)
    .bind(&request.message)
    .bind(&request.reject_reason)
    .bind(request.active_step.as_ref().map(|step| step.0.as_str()))
    .bind(i64::from(request.version))
    .bind(request.completed_at.map(format_timestamp))
    .bind(format_timestamp(request.created_at))
    .bind(format_timestamp(request.updated_at))
    .execute(&mut *conn)
    .await?;

    let steps: Vec<&StepAction> = case.steps.iter().collect();
    upsert_steps(conn, &steps).await
}

pub async fn load_case(
    conn: &mut SqliteConnection,
    request_id: &ApprovalRequestId,
) -> Result<Option<ApprovalCase>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM approval_request WHERE id = ?"))
        .bind(&request_id.0)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let request = request_from_row(&row)?;
    let steps = list_steps(conn, request_id).await?;
    Ok(Some(ApprovalCase::new(request, steps)))
}

pub async fn list_steps(
    conn: &mut SqliteConnection,
    request_id: &ApprovalRequestId,
) -> Result<Vec<StepAction>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {STEP_ACTION_COLUMNS} FROM approval_step_action
         WHERE request_id = ?
         ORDER BY step_order ASC, id ASC"
    ))
    .bind(&request_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(step_from_row).collect()
}

/// Writes the mutable request fields, guarded by the version the caller
/// loaded. A lost race leaves the row untouched and reports a conflict.
pub async fn update_request(
    conn: &mut SqliteConnection,
    request: &ApprovalRequest,
    expected_version: u32,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_request
         SET status = ?, priority = ?, reject_reason = ?, active_step_id = ?, version = ?,
             completed_at = ?, updated_at = ?
         WHERE id = ? AND version = ?",
    )
    .bind(request.status.as_str())
    .bind(request.priority.as_str())
    .bind(&request.reject_reason)
    .bind(request.active_step.as_ref().map(|step| step.0.as_str()))
    .bind(i64::from(request.version))
    .bind(request.completed_at.map(format_timestamp))
    .bind(format_timestamp(request.updated_at))
    .bind(&request.id.0)
    .bind(i64::from(expected_version))
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::VersionConflict {
            request_id: request.id.0.clone(),
            expected: expected_version,
        });
    }
    Ok(())
}

pub async fn upsert_steps(
    conn: &mut SqliteConnection,
    steps: &[&StepAction],
) -> Result<(), RepositoryError> {
    for step in steps {
        let (origin, template_id) = match &step.origin {
            StepOrigin::Template { step_template_id } => ("template", Some(step_template_id.0.as_str())),
            StepOrigin::Escalation => ("escalation", None),
        };

        sqlx::query(
            "INSERT INTO approval_step_action (id, request_id, origin, step_template_id,
                                               step_order, step_name, approver_role, is_optional,
                                               status, approver_id, comments, action_date,
                                               created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 approver_id = excluded.approver_id,
                 comments = excluded.comments,
                 action_date = excluded.action_date,
                 updated_at = excluded.updated_at",
        )
        .bind(&step.id.0)
        .bind(&step.request_id.0)
        .bind(origin)
        .bind(template_id)
        .bind(i64::from(step.step_order))
        .bind(&step.step_name)
        .bind(&step.approver_role)
        .bind(step.is_optional)
        .bind(step.status.as_str())
        .bind(step.approver_id.as_ref().map(|user| user.0.as_str()))
        .bind(&step.comments)
        .bind(step.action_date.map(format_timestamp))
        .bind(format_timestamp(step.created_at))
        .bind(format_timestamp(step.updated_at))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Newest first. `scope` narrows the listing to one user's view.
pub async fn list_requests(
    conn: &mut SqliteConnection,
    filter: &RequestFilter,
    scope: Option<&RequestScope>,
) -> Result<Vec<ApprovalRequest>, RepositoryError> {
    let mut query =
        QueryBuilder::<Sqlite>::new(format!("SELECT {REQUEST_COLUMNS} FROM approval_request WHERE 1=1"));

    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(entity_type) = filter.entity_type() {
        query.push(" AND entity_type = ").push_bind(entity_type);
    }
    if let Some(requester) = &filter.requester_id {
        query.push(" AND requester_id = ").push_bind(requester.0.as_str());
    }
    if let Some(scope) = scope {
        query.push(" AND (requester_id = ").push_bind(scope.user_id.0.as_str());
        if !scope.step_roles.is_empty() {
            query.push(
                " OR (status = 'PENDING' AND active_step_id IN (
                     SELECT id FROM approval_step_action
                     WHERE status = 'PENDING' AND lower(trim(approver_role)) IN (",
            );
            let mut roles = query.separated(", ");
            for role in &scope.step_roles {
                roles.push_bind(role.as_str());
            }
            query.push(")))");
        }
        query.push(")");
    }

    query
        .push(" ORDER BY created_at DESC, id ASC LIMIT ")
        .push_bind(i64::from(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT)))
        .push(" OFFSET ")
        .push_bind(i64::from(filter.offset.unwrap_or(0)));

    let rows = query.build().fetch_all(&mut *conn).await?;
    rows.iter().map(request_from_row).collect()
}

/// Open requests whose active step is still waiting, with the role that
/// step needs. Oldest first.
pub async fn list_active_step_roles(
    conn: &mut SqliteConnection,
) -> Result<Vec<(ApprovalRequestId, String)>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT r.id AS request_id, s.approver_role AS approver_role
         FROM approval_request r
         JOIN approval_step_action s ON s.id = r.active_step_id
         WHERE r.status = 'PENDING' AND s.status = 'PENDING'
         ORDER BY r.created_at ASC, r.id ASC",
    )
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok((ApprovalRequestId(row.try_get("request_id")?), row.try_get("approver_role")?))
        })
        .collect()
}

/// Loads several cases with batched request and step queries instead of
/// one round trip per case. Keeps the order of `ids`; unknown ids are skipped.
pub async fn load_cases(
    conn: &mut SqliteConnection,
    ids: &[ApprovalRequestId],
) -> Result<Vec<ApprovalCase>, RepositoryError> {
    let mut requests = HashMap::with_capacity(ids.len());
    let mut steps: HashMap<String, Vec<StepAction>> = HashMap::new();

    for chunk in ids.chunks(IDS_PER_QUERY) {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request WHERE id IN ("
        ));
        let mut bound = query.separated(", ");
        for id in chunk {
            bound.push_bind(id.0.as_str());
        }
        query.push(")");
        for row in query.build().fetch_all(&mut *conn).await? {
            let request = request_from_row(&row)?;
            requests.insert(request.id.0.clone(), request);
        }

        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {STEP_ACTION_COLUMNS} FROM approval_step_action WHERE request_id IN ("
        ));
        let mut bound = query.separated(", ");
        for id in chunk {
            bound.push_bind(id.0.as_str());
        }
        query.push(") ORDER BY step_order ASC, id ASC");
        for row in query.build().fetch_all(&mut *conn).await? {
            let step = step_from_row(&row)?;
            steps.entry(step.request_id.0.clone()).or_default().push(step);
        }
    }

    Ok(ids
        .iter()
        .filter_map(|id| {
            let request = requests.remove(&id.0)?;
            Some(ApprovalCase::new(request, steps.remove(&id.0).unwrap_or_default()))
        })
        .collect())
}

fn request_from_row(row: &SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let entity_type_raw = row.try_get::<String, _>("entity_type")?;
    let entity_type = EntityType::parse(&entity_type_raw)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ApprovalStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request status `{status_raw}`")))?;
    let priority_raw = row.try_get::<String, _>("priority")?;
    let priority = ApprovalPriority::parse(&priority_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown priority `{priority_raw}`")))?;

    Ok(ApprovalRequest {
        id: ApprovalRequestId(row.try_get("id")?),
        request_code: row.try_get("request_code")?,
        workflow_id: WorkflowId(row.try_get("workflow_id")?),
        requester_id: UserId(row.try_get("requester_id")?),
        entity_type,
        entity_id: row.try_get("entity_id")?,
        amount: parse_decimal("amount", row.try_get("amount")?)?,
        status,
        priority,
        title: row.try_get("request_title")?,
        message: row.try_get("request_message")?,
        reject_reason: row.try_get("reject_reason")?,
        active_step: row.try_get::<Option<String>, _>("active_step_id")?.map(StepActionId),
        version: parse_u32("version", row.try_get("version")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn step_from_row(row: &SqliteRow) -> Result<StepAction, RepositoryError> {
    let origin_raw = row.try_get::<String, _>("origin")?;
    let template_id = row.try_get::<Option<String>, _>("step_template_id")?;
    let origin = match (origin_raw.as_str(), template_id) {
        ("template", Some(id)) => StepOrigin::Template { step_template_id: StepTemplateId(id) },
        ("escalation", None) => StepOrigin::Escalation,
        (other, template_id) => {
            return Err(RepositoryError::Decode(format!(
                "inconsistent step origin `{other}` (template id: {template_id:?})"
            )))
        }
    };
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ApprovalStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown step status `{status_raw}`")))?;

    Ok(StepAction {
        id: StepActionId(row.try_get("id")?),
        request_id: ApprovalRequestId(row.try_get("request_id")?),
        origin,
        step_order: parse_u32("step_order", row.try_get("step_order")?)?,
        step_name: row.try_get("step_name")?,
        approver_role: row.try_get("approver_role")?,
        is_optional: row.try_get("is_optional")?,
        status,
        approver_id: row.try_get::<Option<String>, _>("approver_id")?.map(UserId),
        comments: row.try_get("comments")?,
        action_date: parse_optional_timestamp("action_date", row.try_get("action_date")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
