use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::approvals::roles::Actor;
use crate::approvals::selector::select_workflow;
use crate::domain::approval::{
    ApprovalCase, ApprovalPriority, ApprovalRequest, ApprovalRequestId, ApprovalStatus, Decision,
    EntityType, HistoryAction, HistoryEntry, HistoryEntryId, StepAction, StepActionId, StepOrigin,
    UserId,
};
use crate::domain::workflow::{WorkflowTemplate, ROLE_DIRECTOR};
use crate::errors::ApprovalError;
use crate::events::{OutboundEvent, RequestSummary};

pub const ESCALATION_STEP_ORDER: u32 = 999;
pub const ESCALATION_STEP_NAME: &str = "Director Approval (Escalated)";
pub const AUTO_APPROVED_COMMENT: &str = "Auto-approved: User has multiple role permissions";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnginePolicy {
    /// Lets one decision clear every other pending step the same user is
    /// entitled to.
    pub auto_approve_multi_role: bool,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self { auto_approve_multi_role: true }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApprovalRequest {
    pub entity_type: String,
    pub entity_id: String,
    pub amount: Decimal,
    pub requester_id: UserId,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub priority: Option<ApprovalPriority>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionInput {
    pub actor: Actor,
    pub decision: Decision,
    pub comments: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStatusUpdate {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub status: ApprovalStatus,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Instantiation {
    pub case: ApprovalCase,
    pub history: Vec<HistoryEntry>,
    pub events: Vec<OutboundEvent>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecisionOutcome {
    pub case: ApprovalCase,
    pub decided_step: StepActionId,
    pub auto_approved: Vec<StepActionId>,
    pub activated: Option<StepActionId>,
    pub history: Vec<HistoryEntry>,
    pub events: Vec<OutboundEvent>,
    pub entity_update: Option<EntityStatusUpdate>,
}

impl DecisionOutcome {
    pub fn touched_steps(&self) -> Vec<&StepAction> {
        self.case
            .steps
            .iter()
            .filter(|step| step.id == self.decided_step || self.auto_approved.contains(&step.id))
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.case.request.status.is_terminal()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EscalationOutcome {
    pub case: ApprovalCase,
    pub director_step: StepActionId,
    pub step_created: bool,
    pub previous_active_step: Option<StepActionId>,
    pub history: Vec<HistoryEntry>,
    pub events: Vec<OutboundEvent>,
}

impl EscalationOutcome {
    pub fn director(&self) -> Option<&StepAction> {
        self.case.step(&self.director_step)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ApprovalEngine {
    policy: EnginePolicy,
}

impl ApprovalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: EnginePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> EnginePolicy {
        self.policy
    }

    /// Resolves the module from the entity type, selects the covering
    /// workflow among `workflows` and instantiates it.
    pub fn create(
        &self,
        workflows: &[WorkflowTemplate],
        input: NewApprovalRequest,
        now: DateTime<Utc>,
    ) -> Result<Instantiation, ApprovalError> {
        let entity_type = EntityType::parse(&input.entity_type)?;
        let workflow = select_workflow(workflows, entity_type.module(), input.amount)?;
        self.instantiate(workflow, input, now)
    }

    pub fn instantiate(
        &self,
        workflow: &WorkflowTemplate,
        input: NewApprovalRequest,
        now: DateTime<Utc>,
    ) -> Result<Instantiation, ApprovalError> {
        let entity_type = EntityType::parse(&input.entity_type)?;
        if entity_type.module() != workflow.module {
            return Err(ApprovalError::InvariantViolation(format!(
                "workflow `{}` serves {} but the entity is a {}",
                workflow.id,
                workflow.module,
                entity_type.as_str()
            )));
        }
        if workflow.steps.is_empty() {
            return Err(ApprovalError::EmptyWorkflow(workflow.id.clone()));
        }

        let request_id = ApprovalRequestId(Uuid::new_v4().to_string());
        let steps: Vec<StepAction> = workflow
            .steps
            .iter()
            .map(|template| StepAction {
                id: StepActionId(Uuid::new_v4().to_string()),
                request_id: request_id.clone(),
                origin: StepOrigin::Template { step_template_id: template.id.clone() },
                step_order: template.step_order,
                step_name: template.name.clone(),
                approver_role: template.approver_role.clone(),
                is_optional: template.is_optional,
                status: ApprovalStatus::Pending,
                approver_id: None,
                comments: String::new(),
                action_date: None,
                created_at: now,
                updated_at: now,
            })
            .collect();

        let first = steps
            .iter()
            .filter(|step| !step.is_dormant_director())
            .min_by_key(|step| step.step_order)
            .or_else(|| steps.iter().min_by_key(|step| step.step_order))
            .map(|step| step.id.clone());

        let request = ApprovalRequest {
            id: request_id,
            request_code: request_code(entity_type, now),
            workflow_id: workflow.id.clone(),
            requester_id: input.requester_id,
            entity_type,
            entity_id: input.entity_id,
            amount: input.amount,
            status: ApprovalStatus::Pending,
            priority: input.priority.unwrap_or_default(),
            title: input.title,
            message: input.message,
            reject_reason: None,
            active_step: first,
            version: 0,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        let case = ApprovalCase::new(request, steps);

        let history = vec![history_entry(
            &case.request,
            &case.request.requester_id,
            HistoryAction::Created,
            "Approval request created",
            json!({
                "workflow_id": workflow.id.0,
                "request_code": case.request.request_code,
                "amount": case.request.amount.to_string(),
            }),
            now,
        )];
        let events = activation_event(&case).into_iter().collect();

        Ok(Instantiation { case, history, events })
    }

    pub fn decide(
        &self,
        case: &ApprovalCase,
        input: &DecisionInput,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, ApprovalError> {
        ensure_pending(&case.request)?;

        let matched = case
            .active_step()
            .filter(|step| step.is_pending() && input.actor.can_approve(&step.approver_role))
            .ok_or_else(|| ApprovalError::NoEligibleStep { user_id: input.actor.user_id.clone() })?;
        let matched_id = matched.id.clone();
        let matched_order = matched.step_order;

        let mut next = case.clone();
        let actor = &input.actor.user_id;
        let mut history = Vec::new();
        let mut events = Vec::new();

        match input.decision {
            Decision::Reject => {
                let step = record_action(
                    &mut next,
                    &matched_id,
                    ApprovalStatus::Rejected,
                    actor,
                    &input.comments,
                    now,
                )?;
                history.push(history_entry(
                    &next.request,
                    actor,
                    HistoryAction::Rejected,
                    &input.comments,
                    step_metadata(&step),
                    now,
                ));

                next.request.status = ApprovalStatus::Rejected;
                next.request.reject_reason = Some(input.comments.clone());
                next.request.completed_at = Some(now);
                next.request.active_step = None;
                touch(&mut next.request, now);
                events.push(OutboundEvent::RequestCompleted {
                    request: RequestSummary::from(&next.request),
                });

                let entity_update = Some(entity_update(&next.request, now));
                Ok(DecisionOutcome {
                    case: next,
                    decided_step: matched_id,
                    auto_approved: Vec::new(),
                    activated: None,
                    history,
                    events,
                    entity_update,
                })
            }
            Decision::Approve => {
                let step = record_action(
                    &mut next,
                    &matched_id,
                    ApprovalStatus::Approved,
                    actor,
                    &input.comments,
                    now,
                )?;
                history.push(history_entry(
                    &next.request,
                    actor,
                    HistoryAction::Approved,
                    &input.comments,
                    step_metadata(&step),
                    now,
                ));

                let auto_approved = if self.policy.auto_approve_multi_role {
                    cascade(&mut next, &matched_id, &input.actor, now, &mut history)?
                } else {
                    Vec::new()
                };

                if is_complete(&next) {
                    next.request.status = ApprovalStatus::Approved;
                    next.request.completed_at = Some(now);
                    next.request.active_step = None;
                    touch(&mut next.request, now);

                    events.push(OutboundEvent::RequestCompleted {
                        request: RequestSummary::from(&next.request),
                    });
                    if next.request.entity_type == EntityType::Purchase {
                        events.push(OutboundEvent::PurchaseApproved {
                            request_id: next.request.id.clone(),
                            entity_id: next.request.entity_id.clone(),
                        });
                    }

                    let entity_update = Some(entity_update(&next.request, now));
                    return Ok(DecisionOutcome {
                        case: next,
                        decided_step: matched_id,
                        auto_approved,
                        activated: None,
                        history,
                        events,
                        entity_update,
                    });
                }

                let activated = route_next(&next, matched_order)?;
                next.request.active_step = Some(activated.clone());
                touch(&mut next.request, now);
                events.extend(activation_event(&next));

                Ok(DecisionOutcome {
                    case: next,
                    decided_step: matched_id,
                    auto_approved,
                    activated: Some(activated),
                    history,
                    events,
                    entity_update: None,
                })
            }
        }
    }

    /// Points the request at a director step, reusing the existing one or
    /// adding an escalation step to this request only. The previously active
    /// step keeps its state and gets picked up again once the director acts.
    pub fn escalate(
        &self,
        case: &ApprovalCase,
        user_id: &UserId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<EscalationOutcome, ApprovalError> {
        ensure_pending(&case.request)?;

        let mut next = case.clone();
        let previous_active_step = next.request.active_step.clone();
        let existing = next.director_step().map(|step| step.id.clone());

        let (director_step, step_created) = match existing {
            Some(step_id) => {
                let step = next
                    .steps
                    .iter_mut()
                    .find(|step| step.id == step_id)
                    .ok_or_else(|| missing_step(&step_id))?;
                step.status = ApprovalStatus::Pending;
                step.approver_id = None;
                step.comments.clear();
                step.action_date = None;
                step.updated_at = now;
                (step_id, false)
            }
            None => {
                let step = StepAction {
                    id: StepActionId(Uuid::new_v4().to_string()),
                    request_id: next.request.id.clone(),
                    origin: StepOrigin::Escalation,
                    step_order: ESCALATION_STEP_ORDER,
                    step_name: ESCALATION_STEP_NAME.to_owned(),
                    approver_role: ROLE_DIRECTOR.to_owned(),
                    is_optional: false,
                    status: ApprovalStatus::Pending,
                    approver_id: None,
                    comments: String::new(),
                    action_date: None,
                    created_at: now,
                    updated_at: now,
                };
                let step_id = step.id.clone();
                next.steps.push(step);
                next = ApprovalCase::new(next.request, next.steps);
                (step_id, true)
            }
        };

        next.request.active_step = Some(director_step.clone());
        next.request.priority = ApprovalPriority::High;
        touch(&mut next.request, now);

        let history = vec![history_entry(
            &next.request,
            user_id,
            HistoryAction::EscalatedToDirector,
            reason,
            json!({
                "reason": reason,
                "director_step": director_step.0,
                "step_created": step_created,
                "previous_active_step": previous_active_step.as_ref().map(|id| id.0.clone()),
            }),
            now,
        )];
        let events = vec![OutboundEvent::DirectorEscalation {
            request: RequestSummary::from(&next.request),
            reason: reason.to_owned(),
        }];

        Ok(EscalationOutcome {
            case: next,
            director_step,
            step_created,
            previous_active_step,
            history,
            events,
        })
    }
}

pub fn request_code(entity_type: EntityType, now: DateTime<Utc>) -> String {
    format!("{}-{}", entity_type.request_code_prefix(), now.format("%Y%m%d%H%M%S"))
}

/// Every step is approved, except optional director steps that were never
/// opened.
pub fn is_complete(case: &ApprovalCase) -> bool {
    case.steps.iter().all(|step| {
        step.status == ApprovalStatus::Approved
            || (step.is_pending() && step.is_dormant_director() && !case.is_active(&step.id))
    })
}

fn ensure_pending(request: &ApprovalRequest) -> Result<(), ApprovalError> {
    if request.status.is_terminal() {
        return Err(ApprovalError::RequestNotPending { status: request.status });
    }
    Ok(())
}

fn touch(request: &mut ApprovalRequest, now: DateTime<Utc>) {
    request.updated_at = now;
    request.version = request.version.saturating_add(1);
}

fn record_action(
    case: &mut ApprovalCase,
    step_id: &StepActionId,
    status: ApprovalStatus,
    actor: &UserId,
    comments: &str,
    now: DateTime<Utc>,
) -> Result<StepAction, ApprovalError> {
    let step =
        case.steps.iter_mut().find(|step| &step.id == step_id).ok_or_else(|| missing_step(step_id))?;
    step.status = status;
    step.approver_id = Some(actor.clone());
    step.comments = comments.to_owned();
    step.action_date = Some(now);
    step.updated_at = now;
    Ok(step.clone())
}

fn cascade(
    case: &mut ApprovalCase,
    source: &StepActionId,
    actor: &Actor,
    now: DateTime<Utc>,
    history: &mut Vec<HistoryEntry>,
) -> Result<Vec<StepActionId>, ApprovalError> {
    let candidates: Vec<StepActionId> = case
        .steps
        .iter()
        .filter(|step| &step.id != source && step.is_pending() && !case.is_active(&step.id))
        .filter(|step| actor.can_approve(&step.approver_role))
        .map(|step| step.id.clone())
        .collect();

    for step_id in &candidates {
        let step = record_action(
            case,
            step_id,
            ApprovalStatus::Approved,
            &actor.user_id,
            AUTO_APPROVED_COMMENT,
            now,
        )?;
        let mut metadata = step_metadata(&step);
        metadata["auto_approved"] = json!(true);
        metadata["source_step"] = json!(source.0);
        history.push(history_entry(
            &case.request,
            &actor.user_id,
            HistoryAction::Approved,
            AUTO_APPROVED_COMMENT,
            metadata,
            now,
        ));
    }

    Ok(candidates)
}

/// Next step after an approval that left the request open: the step right
/// after the one just decided, then a required director step, then the
/// earliest step still waiting.
fn route_next(case: &ApprovalCase, decided_order: u32) -> Result<StepActionId, ApprovalError> {
    let routable = |step: &&StepAction| step.is_pending() && !step.is_dormant_director();

    case.steps
        .iter()
        .filter(routable)
        .find(|step| step.step_order == decided_order.saturating_add(1))
        .or_else(|| case.steps.iter().filter(routable).find(|step| step.is_director()))
        .or_else(|| case.steps.iter().filter(routable).min_by_key(|step| step.step_order))
        .map(|step| step.id.clone())
        .ok_or_else(|| {
            ApprovalError::InvariantViolation(format!(
                "request `{}` is incomplete but has no routable step",
                case.request.id
            ))
        })
}

fn activation_event(case: &ApprovalCase) -> Option<OutboundEvent> {
    let step = case.active_step()?;
    Some(OutboundEvent::ApprovalNeeded {
        request: RequestSummary::from(&case.request),
        approver_role: step.approver_role.clone(),
        step_name: step.step_name.clone(),
    })
}

fn entity_update(request: &ApprovalRequest, now: DateTime<Utc>) -> EntityStatusUpdate {
    EntityStatusUpdate {
        entity_type: request.entity_type,
        entity_id: request.entity_id.clone(),
        status: request.status,
        at: now,
    }
}

fn step_metadata(step: &StepAction) -> serde_json::Value {
    json!({
        "step_id": step.id.0,
        "step_name": step.step_name,
        "step_order": step.step_order,
        "approver_role": step.approver_role,
    })
}

fn history_entry(
    request: &ApprovalRequest,
    user_id: &UserId,
    action: HistoryAction,
    comments: &str,
    metadata: serde_json::Value,
    now: DateTime<Utc>,
) -> HistoryEntry {
    HistoryEntry {
        id: HistoryEntryId(Uuid::new_v4().to_string()),
        request_id: request.id.clone(),
        user_id: user_id.clone(),
        action,
        comments: comments.to_owned(),
        metadata,
        created_at: now,
    }
}

fn missing_step(step_id: &StepActionId) -> ApprovalError {
    ApprovalError::InvariantViolation(format!("step action `{step_id}` is not part of the request"))
}
