use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ApprovalError;

pub const ROLE_DIRECTOR: &str = "director";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepTemplateId(pub String);

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalModule {
    Sales,
    Purchase,
}

impl ApprovalModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sales => "SALES",
            Self::Purchase => "PURCHASE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SALES" => Some(Self::Sales),
            "PURCHASE" => Some(Self::Purchase),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApprovalModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reusable definition of an ordered approval chain for one module and
/// amount bracket. `max_amount == 0` means the bracket has no upper limit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: WorkflowId,
    pub name: String,
    pub module: ApprovalModule,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub is_active: bool,
    pub require_director: bool,
    pub require_finance: bool,
    pub steps: Vec<StepTemplate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowTemplate {
    pub fn is_unbounded(&self) -> bool {
        self.max_amount.is_zero()
    }

    pub fn contains(&self, amount: Decimal) -> bool {
        self.min_amount <= amount && (self.is_unbounded() || self.max_amount >= amount)
    }

    pub fn first_step(&self) -> Option<&StepTemplate> {
        self.steps.iter().min_by_key(|step| step.step_order)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub id: StepTemplateId,
    pub workflow_id: WorkflowId,
    pub step_order: u32,
    pub name: String,
    pub approver_role: String,
    pub is_optional: bool,
    pub is_parallel: bool,
    /// Informational only; no deadline is enforced on a step.
    pub time_limit_hours: u32,
}

impl StepTemplate {
    pub fn is_director(&self) -> bool {
        is_director_role(&self.approver_role)
    }
}

pub fn is_director_role(role: &str) -> bool {
    role.trim().eq_ignore_ascii_case(ROLE_DIRECTOR)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    pub module: ApprovalModule,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub require_director: bool,
    pub require_finance: bool,
    pub steps: Vec<NewStep>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStep {
    pub step_order: u32,
    pub name: String,
    pub approver_role: String,
    #[serde(default)]
    pub is_optional: bool,
    #[serde(default)]
    pub is_parallel: bool,
    #[serde(default)]
    pub time_limit_hours: Option<u32>,
}

pub const DEFAULT_STEP_TIME_LIMIT_HOURS: u32 = 24;

impl NewWorkflow {
    pub fn validate(&self) -> Result<(), ApprovalError> {
        if self.name.trim().is_empty() {
            return Err(ApprovalError::InvalidWorkflow("workflow name must not be empty".into()));
        }
        if self.min_amount.is_sign_negative() || self.max_amount.is_sign_negative() {
            return Err(ApprovalError::InvalidWorkflow(
                "workflow amount bracket must not be negative".into(),
            ));
        }
        if !self.max_amount.is_zero() && self.max_amount < self.min_amount {
            return Err(ApprovalError::InvalidWorkflow(format!(
                "max_amount {} is below min_amount {}",
                self.max_amount, self.min_amount
            )));
        }
        if self.steps.is_empty() {
            return Err(ApprovalError::InvalidWorkflow(
                "workflow needs at least one step".into(),
            ));
        }

        let mut orders: Vec<u32> = self.steps.iter().map(|step| step.step_order).collect();
        orders.sort_unstable();
        if orders[0] == 0 {
            return Err(ApprovalError::InvalidWorkflow("step_order is 1-based".into()));
        }
        if let Some(window) = orders.windows(2).find(|window| window[0] == window[1]) {
            return Err(ApprovalError::InvalidWorkflow(format!(
                "duplicate step_order {}",
                window[0]
            )));
        }
        if let Some(step) = self.steps.iter().find(|step| step.approver_role.trim().is_empty()) {
            return Err(ApprovalError::InvalidWorkflow(format!(
                "step {} has no approver role",
                step.step_order
            )));
        }

        Ok(())
    }
}
