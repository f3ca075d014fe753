use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::workflow::{is_director_role, ApprovalModule, StepTemplateId, WorkflowId};
use crate::errors::ApprovalError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalRequestId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepActionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HistoryEntryId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for ApprovalRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for StepActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Sale,
    Purchase,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "SALE",
            Self::Purchase => "PURCHASE",
        }
    }

    /// Strict parse used at the service boundary: anything other than a sale
    /// or a purchase is a hard validation error.
    pub fn parse(value: &str) -> Result<Self, ApprovalError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SALE" => Ok(Self::Sale),
            "PURCHASE" => Ok(Self::Purchase),
            other => Err(ApprovalError::UnsupportedEntityType(other.to_string())),
        }
    }

    pub fn module(&self) -> ApprovalModule {
        match self {
            Self::Sale => ApprovalModule::Sales,
            Self::Purchase => ApprovalModule::Purchase,
        }
    }

    pub fn request_code_prefix(&self) -> &'static str {
        match self {
            Self::Sale => "APP-SALE",
            Self::Purchase => "APP-PUR",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl ApprovalPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "NORMAL" => Some(Self::Normal),
            "HIGH" => Some(Self::High),
            "URGENT" => Some(Self::Urgent),
            _ => None,
        }
    }
}

impl Default for ApprovalPriority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::Reject => "REJECT",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ApprovalError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "APPROVE" => Ok(Self::Approve),
            "REJECT" => Ok(Self::Reject),
            other => Err(ApprovalError::InvalidDecision(other.to_string())),
        }
    }
}

/// Where a step action came from. Escalation steps live only on the request
/// they were added to; the workflow template is never touched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOrigin {
    Template { step_template_id: StepTemplateId },
    Escalation,
}

impl StepOrigin {
    pub fn template_id(&self) -> Option<&StepTemplateId> {
        match self {
            Self::Template { step_template_id } => Some(step_template_id),
            Self::Escalation => None,
        }
    }
}

/// Live per-request instance of a step. The routing fields are a snapshot of
/// the template taken at instantiation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAction {
    pub id: StepActionId,
    pub request_id: ApprovalRequestId,
    pub origin: StepOrigin,
    pub step_order: u32,
    pub step_name: String,
    pub approver_role: String,
    pub is_optional: bool,
    pub status: ApprovalStatus,
    pub approver_id: Option<UserId>,
    pub comments: String,
    pub action_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StepAction {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    pub fn is_director(&self) -> bool {
        is_director_role(&self.approver_role)
    }

    /// Optional director steps never take part in sequential routing; they
    /// only open through escalation.
    pub fn is_dormant_director(&self) -> bool {
        self.is_director() && self.is_optional
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalRequestId,
    pub request_code: String,
    pub workflow_id: WorkflowId,
    pub requester_id: UserId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub amount: Decimal,
    pub status: ApprovalStatus,
    pub priority: ApprovalPriority,
    pub title: String,
    pub message: String,
    pub reject_reason: Option<String>,
    pub active_step: Option<StepActionId>,
    pub version: u32,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    Created,
    Approved,
    Rejected,
    EscalatedToDirector,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::EscalatedToDirector => "ESCALATED_TO_DIRECTOR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Some(Self::Created),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            "ESCALATED_TO_DIRECTOR" => Some(Self::EscalatedToDirector),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryEntryId,
    pub request_id: ApprovalRequestId,
    pub user_id: UserId,
    pub action: HistoryAction,
    pub comments: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// A request together with all of its step actions, ordered by `step_order`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalCase {
    pub request: ApprovalRequest,
    pub steps: Vec<StepAction>,
}

impl ApprovalCase {
    pub fn new(request: ApprovalRequest, mut steps: Vec<StepAction>) -> Self {
        steps.sort_by(|left, right| {
            left.step_order.cmp(&right.step_order).then_with(|| left.id.cmp(&right.id))
        });
        Self { request, steps }
    }

    pub fn is_active(&self, step_id: &StepActionId) -> bool {
        self.request.active_step.as_ref() == Some(step_id)
    }

    pub fn active_step(&self) -> Option<&StepAction> {
        let active = self.request.active_step.as_ref()?;
        self.steps.iter().find(|step| &step.id == active)
    }

    pub fn step(&self, step_id: &StepActionId) -> Option<&StepAction> {
        self.steps.iter().find(|step| &step.id == step_id)
    }

    pub fn director_step(&self) -> Option<&StepAction> {
        self.steps.iter().find(|step| step.is_director())
    }
}
