use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

use approvo_core::approvals::{
    Actor, ApprovalEngine, DecisionInput, DecisionOutcome, EscalationOutcome, NewApprovalRequest,
    RoleResolver,
};
use approvo_core::config::ApprovalsConfig;
use approvo_core::domain::approval::{
    ApprovalCase, ApprovalRequest, ApprovalRequestId, Decision, EntityType, HistoryEntry, UserId,
};
use approvo_core::domain::workflow::{
    ApprovalModule, NewWorkflow, StepTemplate, StepTemplateId, WorkflowId, WorkflowTemplate,
    DEFAULT_STEP_TIME_LIMIT_HOURS,
};
use approvo_core::errors::{ApplicationError, ApprovalError};
use approvo_core::ports::CollaboratorError;

use crate::repositories::{
    history, outbox, request, user, workflow, EntityStatusUpdater, OutboxStatus, RepositoryError,
    RequestFilter, RequestScope, SqlEntityStatusUpdater, SqlUserDirectory,
};
use crate::DbPool;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error("approval request `{request_id}` kept changing; gave up after {attempts} attempts")]
    Conflict { request_id: String, attempts: u32 },
}

impl ServiceError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Repository(error) if error.is_retryable())
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(error: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::Database(error))
    }
}

impl From<ServiceError> for ApplicationError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Approval(error) => Self::Approval(error),
            ServiceError::Repository(error @ RepositoryError::NotFound { .. }) => {
                Self::NotFound(error.to_string())
            }
            ServiceError::Repository(error @ RepositoryError::VersionConflict { .. }) => {
                Self::Conflict(error.to_string())
            }
            ServiceError::Repository(error) => Self::Persistence(error.to_string()),
            ServiceError::Collaborator(error) => Self::Integration(error.to_string()),
            error @ ServiceError::Conflict { .. } => Self::Conflict(error.to_string()),
        }
    }
}

/// Runs the approval engine against the database. Every state change is one
/// transaction covering the request, its steps, the audit trail, the entity
/// status and the outbox rows describing the side effects.
#[derive(Clone)]
pub struct ApprovalService {
    pool: DbPool,
    engine: ApprovalEngine,
    entity_updater: Arc<dyn EntityStatusUpdater>,
    max_attempts: u32,
    outbox_signal: Arc<Notify>,
}

impl ApprovalService {
    pub fn new(pool: DbPool) -> Self {
        Self::from_config(pool, &ApprovalsConfig::default())
    }

    pub fn from_config(pool: DbPool, config: &ApprovalsConfig) -> Self {
        Self {
            pool,
            engine: ApprovalEngine::with_policy(config.engine_policy()),
            entity_updater: Arc::new(SqlEntityStatusUpdater),
            max_attempts: config.decision_max_attempts.max(1),
            outbox_signal: Arc::new(Notify::new()),
        }
    }

    pub fn with_entity_updater(mut self, entity_updater: Arc<dyn EntityStatusUpdater>) -> Self {
        self.entity_updater = entity_updater;
        self
    }

    pub fn engine(&self) -> &ApprovalEngine {
        &self.engine
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Woken after every commit that enqueued outbox rows.
    pub fn outbox_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.outbox_signal)
    }

    pub async fn create_workflow(
        &self,
        input: NewWorkflow,
    ) -> Result<WorkflowTemplate, ServiceError> {
        input.validate()?;
        let template = build_template(input, storage_now());

        let mut tx = self.pool.begin().await?;
        workflow::insert_workflow(&mut tx, &template).await?;
        tx.commit().await?;

        info!(
            event_name = "approval.workflow.created",
            workflow_id = %template.id,
            module = %template.module,
            min_amount = %template.min_amount,
            max_amount = %template.max_amount,
            steps = template.steps.len(),
            "workflow template created"
        );
        Ok(template)
    }

    pub async fn list_workflows(
        &self,
        module: Option<ApprovalModule>,
    ) -> Result<Vec<WorkflowTemplate>, ServiceError> {
        let mut conn = self.pool.acquire().await?;
        Ok(workflow::list_workflows(&mut conn, module).await?)
    }

    /// Selects the covering workflow and opens a request on it. Nothing is
    /// written when no workflow matches.
    pub async fn create_request(
        &self,
        input: NewApprovalRequest,
    ) -> Result<ApprovalCase, ServiceError> {
        let entity_type = EntityType::parse(&input.entity_type)?;
        let now = storage_now();

        let mut tx = self.pool.begin().await?;
        let workflows = workflow::list_active_for_module(&mut tx, entity_type.module()).await?;
        let created = self.engine.create(&workflows, input, now)?;

        request::insert_case(&mut tx, &created.case).await?;
        history::append(&mut tx, &created.history).await?;
        let queued = outbox::enqueue(&mut tx, &created.events, now).await?;
        tx.commit().await?;
        self.signal_outbox(queued);

        let request = &created.case.request;
        info!(
            event_name = "approval.request.created",
            request_id = %request.id,
            request_code = %request.request_code,
            workflow_id = %request.workflow_id,
            entity_type = request.entity_type.as_str(),
            entity_id = %request.entity_id,
            amount = %request.amount,
            active_step = ?request.active_step.as_ref().map(|step| step.0.as_str()),
            "approval request created"
        );
        Ok(created.case)
    }

    pub async fn process_decision(
        &self,
        request_id: &ApprovalRequestId,
        user_id: &UserId,
        decision: Decision,
        comments: &str,
    ) -> Result<DecisionOutcome, ServiceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_decide(request_id, user_id, decision, comments).await {
                Ok(outcome) => {
                    self.log_decision(&outcome, user_id, decision, attempt);
                    return Ok(outcome);
                }
                Err(error) if error.is_retryable() => {
                    if attempt >= self.max_attempts {
                        warn!(
                            event_name = "approval.decision.conflict",
                            request_id = %request_id,
                            user_id = %user_id,
                            attempts = attempt,
                            error = %error,
                            "decision abandoned after repeated concurrent modifications"
                        );
                        return Err(ServiceError::Conflict {
                            request_id: request_id.0.clone(),
                            attempts: attempt,
                        });
                    }
                    warn!(
                        event_name = "approval.decision.retry",
                        request_id = %request_id,
                        attempt,
                        error = %error,
                        "request changed concurrently, retrying decision"
                    );
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn try_decide(
        &self,
        request_id: &ApprovalRequestId,
        user_id: &UserId,
        decision: Decision,
        comments: &str,
    ) -> Result<DecisionOutcome, ServiceError> {
        let now = storage_now();
        let mut tx = self.pool.begin().await?;

        let case = load_existing(&mut tx, request_id).await?;
        let role = user::find_role(&mut tx, user_id).await?;
        let input = DecisionInput {
            actor: Actor::new(user_id.clone(), role),
            decision,
            comments: comments.to_owned(),
        };
        let outcome = self.engine.decide(&case, &input, now)?;

        request::update_request(&mut tx, &outcome.case.request, case.request.version).await?;
        request::upsert_steps(&mut tx, &outcome.touched_steps()).await?;
        history::append(&mut tx, &outcome.history).await?;
        if let Some(update) = &outcome.entity_update {
            self.entity_updater.set_entity_status(&mut tx, update).await?;
        }
        let queued = outbox::enqueue(&mut tx, &outcome.events, now).await?;
        tx.commit().await?;
        self.signal_outbox(queued);

        Ok(outcome)
    }

    fn log_decision(
        &self,
        outcome: &DecisionOutcome,
        user_id: &UserId,
        decision: Decision,
        attempt: u32,
    ) {
        let request = &outcome.case.request;
        for step_id in &outcome.auto_approved {
            let step_name = outcome.case.step(step_id).map(|step| step.step_name.as_str());
            warn!(
                event_name = "approval.cascade.auto_approved",
                request_id = %request.id,
                step_id = %step_id,
                step_name = ?step_name,
                source_step = %outcome.decided_step,
                user_id = %user_id,
                "step auto-approved because the user holds its role as well"
            );
        }
        info!(
            event_name = "approval.decision.applied",
            request_id = %request.id,
            request_code = %request.request_code,
            user_id = %user_id,
            decision = decision.as_str(),
            decided_step = %outcome.decided_step,
            status = %request.status,
            activated = ?outcome.activated.as_ref().map(|step| step.0.as_str()),
            version = request.version,
            attempt,
            "approval decision applied"
        );
    }

    /// Points the request at a director step. Same retry behaviour as
    /// decisions.
    pub async fn escalate_to_director(
        &self,
        request_id: &ApprovalRequestId,
        user_id: &UserId,
        reason: &str,
    ) -> Result<EscalationOutcome, ServiceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_escalate(request_id, user_id, reason).await {
                Ok(outcome) => {
                    info!(
                        event_name = "approval.request.escalated",
                        request_id = %request_id,
                        user_id = %user_id,
                        director_step = %outcome.director_step,
                        step_created = outcome.step_created,
                        previous_active_step = ?outcome
                            .previous_active_step
                            .as_ref()
                            .map(|step| step.0.as_str()),
                        attempt,
                        "request escalated to director"
                    );
                    return Ok(outcome);
                }
                Err(error) if error.is_retryable() => {
                    if attempt >= self.max_attempts {
                        return Err(ServiceError::Conflict {
                            request_id: request_id.0.clone(),
                            attempts: attempt,
                        });
                    }
                    warn!(
                        event_name = "approval.escalation.retry",
                        request_id = %request_id,
                        attempt,
                        error = %error,
                        "request changed concurrently, retrying escalation"
                    );
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn try_escalate(
        &self,
        request_id: &ApprovalRequestId,
        user_id: &UserId,
        reason: &str,
    ) -> Result<EscalationOutcome, ServiceError> {
        let now = storage_now();
        let mut tx = self.pool.begin().await?;

        let case = load_existing(&mut tx, request_id).await?;
        let outcome = self.engine.escalate(&case, user_id, reason, now)?;

        request::update_request(&mut tx, &outcome.case.request, case.request.version).await?;
        if let Some(director) = outcome.director() {
            request::upsert_steps(&mut tx, &[director]).await?;
        }
        history::append(&mut tx, &outcome.history).await?;
        let queued = outbox::enqueue(&mut tx, &outcome.events, now).await?;
        tx.commit().await?;
        self.signal_outbox(queued);

        Ok(outcome)
    }

    pub async fn get_request(
        &self,
        request_id: &ApprovalRequestId,
    ) -> Result<ApprovalCase, ServiceError> {
        let mut conn = self.pool.acquire().await?;
        load_existing(&mut conn, request_id).await
    }

    pub async fn history(
        &self,
        request_id: &ApprovalRequestId,
    ) -> Result<Vec<HistoryEntry>, ServiceError> {
        let mut conn = self.pool.acquire().await?;
        load_existing(&mut conn, request_id).await?;
        Ok(history::list_for_request(&mut conn, request_id).await?)
    }

    /// Open requests whose active step the user may decide right now.
    pub async fn pending_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ApprovalCase>, ServiceError> {
        let directory = SqlUserDirectory::new(self.pool.clone());
        let actor = RoleResolver::new(&directory).actor(user_id).await?;
        if actor.role.is_none() {
            return Ok(Vec::new());
        }

        let mut conn = self.pool.acquire().await?;
        let actionable: Vec<ApprovalRequestId> = request::list_active_step_roles(&mut conn)
            .await?
            .into_iter()
            .filter(|(_, role)| actor.can_approve(role))
            .map(|(request_id, _)| request_id)
            .collect();
        Ok(request::load_cases(&mut conn, &actionable).await?)
    }

    /// Lists requests newest first. With `visible_to` set, non-admin users
    /// only see what they raised and open requests waiting on their role.
    pub async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, ServiceError> {
        let scope = match &filter.visible_to {
            Some(user_id) => {
                let directory = SqlUserDirectory::new(self.pool.clone());
                let actor = RoleResolver::new(&directory).actor(user_id).await?;
                actor.visible_step_roles().map(|roles| RequestScope {
                    user_id: user_id.clone(),
                    step_roles: roles.into_iter().map(str::to_owned).collect(),
                })
            }
            None => None,
        };

        let mut conn = self.pool.acquire().await?;
        Ok(request::list_requests(&mut conn, filter, scope.as_ref()).await?)
    }

    pub async fn outbox_backlog(&self) -> Result<u64, ServiceError> {
        let mut conn = self.pool.acquire().await?;
        Ok(outbox::count_by_status(&mut conn, OutboxStatus::Pending).await?)
    }

    fn signal_outbox(&self, queued: usize) {
        if queued > 0 {
            self.outbox_signal.notify_one();
        }
    }
}

/// Storage keeps microseconds, so values handed back to callers match what
/// a later read returns.
fn storage_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

async fn load_existing(
    conn: &mut sqlx::SqliteConnection,
    request_id: &ApprovalRequestId,
) -> Result<ApprovalCase, ServiceError> {
    request::load_case(conn, request_id).await?.ok_or_else(|| {
        ServiceError::Repository(RepositoryError::NotFound {
            entity: "approval request",
            id: request_id.0.clone(),
        })
    })
}

fn build_template(input: NewWorkflow, now: DateTime<Utc>) -> WorkflowTemplate {
    let id = WorkflowId(Uuid::new_v4().to_string());
    let mut steps: Vec<StepTemplate> = input
        .steps
        .into_iter()
        .map(|step| StepTemplate {
            id: StepTemplateId(Uuid::new_v4().to_string()),
            workflow_id: id.clone(),
            step_order: step.step_order,
            name: step.name,
            approver_role: step.approver_role.trim().to_owned(),
            is_optional: step.is_optional,
            is_parallel: step.is_parallel,
            time_limit_hours: step.time_limit_hours.unwrap_or(DEFAULT_STEP_TIME_LIMIT_HOURS),
        })
        .collect();
    steps.sort_by_key(|step| step.step_order);

    WorkflowTemplate {
        id,
        name: input.name,
        module: input.module,
        min_amount: input.min_amount,
        max_amount: input.max_amount,
        is_active: true,
        require_director: input.require_director,
        require_finance: input.require_finance,
        steps,
        created_at: now,
        updated_at: now,
    }
}
