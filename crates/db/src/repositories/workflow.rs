use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use approvo_core::domain::workflow::{
    ApprovalModule, StepTemplate, StepTemplateId, WorkflowId, WorkflowTemplate,
};

use super::{format_timestamp, parse_decimal, parse_timestamp, parse_u32, RepositoryError};

const WORKFLOW_COLUMNS: &str = "id, name, module, min_amount, max_amount, is_active,
     require_director, require_finance, created_at, updated_at";

const STEP_COLUMNS: &str = "id, workflow_id, step_order, name, approver_role, is_optional,
     is_parallel, time_limit_hours";

pub async fn insert_workflow(
    conn: &mut SqliteConnection,
    workflow: &WorkflowTemplate,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_workflow (id, name, module, min_amount, max_amount, is_active,
                                        require_director, require_finance, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&workflow.id.0)
    .bind(&workflow.name)
    .bind(workflow.module.as_str())
    .bind(workflow.min_amount.to_string())
    .bind(workflow.max_amount.to_string())
    .bind(workflow.is_active)
    .bind(workflow.require_director)
    .bind(workflow.require_finance)
    .bind(format_timestamp(workflow.created_at))
    .bind(format_timestamp(workflow.updated_at))
    .execute(&mut *conn)
    .await?;

    for step in &workflow.steps {
        sqlx::query(
            "INSERT INTO approval_step (id, workflow_id, step_order, name, approver_role,
                                        is_optional, is_parallel, time_limit_hours)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&step.id.0)
        .bind(&workflow.id.0)
        .bind(i64::from(step.step_order))
        .bind(&step.name)
        .bind(&step.approver_role)
        .bind(step.is_optional)
        .bind(step.is_parallel)
        .bind(i64::from(step.time_limit_hours))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub async fn find_workflow(
    conn: &mut SqliteConnection,
    id: &WorkflowId,
) -> Result<Option<WorkflowTemplate>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {WORKFLOW_COLUMNS} FROM approval_workflow WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut workflows = attach_steps(conn, vec![workflow_from_row(&row)?]).await?;
    Ok(workflows.pop())
}

/// Active templates of one module, the candidate set for bracket selection.
pub async fn list_active_for_module(
    conn: &mut SqliteConnection,
    module: ApprovalModule,
) -> Result<Vec<WorkflowTemplate>, RepositoryError> {
    list_workflows(conn, Some(module)).await
}

pub async fn list_workflows(
    conn: &mut SqliteConnection,
    module: Option<ApprovalModule>,
) -> Result<Vec<WorkflowTemplate>, RepositoryError> {
    let sql = format!(
        "SELECT {WORKFLOW_COLUMNS} FROM approval_workflow
         WHERE is_active = 1 AND (? IS NULL OR module = ?)
         ORDER BY module ASC, CAST(min_amount AS REAL) ASC, id ASC"
    );
    let module = module.as_ref().map(ApprovalModule::as_str);
    let rows = sqlx::query(&sql).bind(module).bind(module).fetch_all(&mut *conn).await?;

    let workflows = rows.iter().map(workflow_from_row).collect::<Result<Vec<_>, _>>()?;
    attach_steps(conn, workflows).await
}

async fn attach_steps(
    conn: &mut SqliteConnection,
    mut workflows: Vec<WorkflowTemplate>,
) -> Result<Vec<WorkflowTemplate>, RepositoryError> {
    if workflows.is_empty() {
        return Ok(workflows);
    }

    let placeholders = vec!["?"; workflows.len()].join(", ");
    let sql = format!(
        "SELECT {STEP_COLUMNS} FROM approval_step
         WHERE workflow_id IN ({placeholders})
         ORDER BY workflow_id ASC, step_order ASC"
    );
    let mut query = sqlx::query(&sql);
    for workflow in &workflows {
        query = query.bind(&workflow.id.0);
    }
    let rows = query.fetch_all(&mut *conn).await?;

    let mut steps_by_workflow: BTreeMap<String, Vec<StepTemplate>> = BTreeMap::new();
    for row in &rows {
        let step = step_from_row(row)?;
        steps_by_workflow.entry(step.workflow_id.0.clone()).or_default().push(step);
    }
    for workflow in &mut workflows {
        workflow.steps = steps_by_workflow.remove(&workflow.id.0).unwrap_or_default();
    }

    Ok(workflows)
}

fn workflow_from_row(row: &SqliteRow) -> Result<WorkflowTemplate, RepositoryError> {
    let module_raw = row.try_get::<String, _>("module")?;
    let module = ApprovalModule::parse(&module_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown workflow module `{module_raw}`")))?;

    Ok(WorkflowTemplate {
        id: WorkflowId(row.try_get("id")?),
        name: row.try_get("name")?,
        module,
        min_amount: parse_decimal("min_amount", row.try_get("min_amount")?)?,
        max_amount: parse_decimal("max_amount", row.try_get("max_amount")?)?,
        is_active: row.try_get("is_active")?,
        require_director: row.try_get("require_director")?,
        require_finance: row.try_get("require_finance")?,
        steps: Vec::new(),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn step_from_row(row: &SqliteRow) -> Result<StepTemplate, RepositoryError> {
    Ok(StepTemplate {
        id: StepTemplateId(row.try_get("id")?),
        workflow_id: WorkflowId(row.try_get("workflow_id")?),
        step_order: parse_u32("step_order", row.try_get("step_order")?)?,
        name: row.try_get("name")?,
        approver_role: row.try_get("approver_role")?,
        is_optional: row.try_get("is_optional")?,
        is_parallel: row.try_get("is_parallel")?,
        time_limit_hours: parse_u32("time_limit_hours", row.try_get("time_limit_hours")?)?,
    })
}
