use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use approvo_core::domain::approval::UserId;
use approvo_core::domain::workflow::{
    ApprovalModule, StepTemplate, StepTemplateId, WorkflowId, WorkflowTemplate,
};
use approvo_core::ports::DirectoryUser;

use crate::connection::DbPool;
use crate::repositories::{user, workflow, RepositoryError};

struct SeedUser {
    id: &'static str,
    name: &'static str,
    role: &'static str,
}

struct SeedStep {
    order: u32,
    name: &'static str,
    role: &'static str,
    optional: bool,
}

struct SeedWorkflow {
    id: &'static str,
    name: &'static str,
    module: ApprovalModule,
    /// Minor units (two decimals).
    min_amount_cents: i64,
    max_amount_cents: i64,
    require_director: bool,
    steps: &'static [SeedStep],
}

const SEED_USERS: &[SeedUser] = &[
    SeedUser { id: "u-employee", name: "Erin Employee", role: "employee" },
    SeedUser { id: "u-manager", name: "Morgan Manager", role: "manager" },
    SeedUser { id: "u-finance", name: "Frankie Finance", role: "finance" },
    SeedUser { id: "u-director", name: "Dana Director", role: "director" },
    SeedUser { id: "u-admin", name: "Alex Admin", role: "admin" },
];

const SEED_WORKFLOWS: &[SeedWorkflow] = &[
    SeedWorkflow {
        id: "wf-purchase-standard",
        name: "Purchase up to 5.000.000",
        module: ApprovalModule::Purchase,
        min_amount_cents: 0,
        max_amount_cents: 500_000_000,
        require_director: false,
        steps: &[
            SeedStep { order: 1, name: "Employee Review", role: "employee", optional: false },
            SeedStep { order: 2, name: "Finance Approval", role: "finance", optional: false },
        ],
    },
    SeedWorkflow {
        id: "wf-purchase-large",
        name: "Purchase above 5.000.000",
        module: ApprovalModule::Purchase,
        min_amount_cents: 500_000_001,
        max_amount_cents: 0,
        require_director: true,
        steps: &[
            SeedStep { order: 1, name: "Employee Review", role: "employee", optional: false },
            SeedStep { order: 2, name: "Finance Approval", role: "finance", optional: false },
            SeedStep { order: 3, name: "Director Approval", role: "director", optional: false },
        ],
    },
    SeedWorkflow {
        id: "wf-sales-standard",
        name: "Sales",
        module: ApprovalModule::Sales,
        min_amount_cents: 0,
        max_amount_cents: 0,
        require_director: false,
        steps: &[
            SeedStep { order: 1, name: "Employee Review", role: "employee", optional: false },
            SeedStep { order: 2, name: "Finance Approval", role: "finance", optional: false },
            SeedStep { order: 3, name: "Director Approval", role: "director", optional: true },
        ],
    },
];

fn seed_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Demo directory and workflow brackets for local runs and end-to-end tests.
pub struct DemoSeed;

impl DemoSeed {
    pub fn user_ids() -> Vec<UserId> {
        SEED_USERS.iter().map(|user| UserId(user.id.to_owned())).collect()
    }

    pub fn workflows() -> Vec<WorkflowTemplate> {
        SEED_WORKFLOWS.iter().map(SeedWorkflow::template).collect()
    }

    /// Idempotent: users are upserted and workflows that already exist are
    /// left alone.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let now = seed_timestamp();
        let mut tx = pool.begin().await?;

        for seed in SEED_USERS {
            let entry = DirectoryUser {
                id: UserId(seed.id.to_owned()),
                name: seed.name.to_owned(),
                role: seed.role.to_owned(),
                is_active: true,
            };
            user::upsert_user(&mut tx, &entry, now).await?;
        }

        let mut workflows_created = 0;
        for template in Self::workflows() {
            if workflow::find_workflow(&mut tx, &template.id).await?.is_none() {
                workflow::insert_workflow(&mut tx, &template).await?;
                workflows_created += 1;
            }
        }

        tx.commit().await?;
        Ok(SeedResult { users: SEED_USERS.len(), workflows_created })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut conn = pool.acquire().await?;
        let mut missing = Vec::new();

        let users = user::list_users(&mut conn).await?;
        for seed in SEED_USERS {
            if !users.iter().any(|user| user.id.0 == seed.id && user.role == seed.role) {
                missing.push(format!("user {}", seed.id));
            }
        }
        for seed in SEED_WORKFLOWS {
            let found = workflow::find_workflow(&mut conn, &WorkflowId(seed.id.to_owned())).await?;
            match found {
                Some(template) if template.steps.len() == seed.steps.len() => {}
                Some(_) => missing.push(format!("steps of workflow {}", seed.id)),
                None => missing.push(format!("workflow {}", seed.id)),
            }
        }

        Ok(VerificationResult { ok: missing.is_empty(), missing })
    }
}

impl SeedWorkflow {
    fn template(&self) -> WorkflowTemplate {
        let id = WorkflowId(self.id.to_owned());
        let now = seed_timestamp();
        WorkflowTemplate {
            id: id.clone(),
            name: self.name.to_owned(),
            module: self.module,
            min_amount: Decimal::new(self.min_amount_cents, 2),
            max_amount: Decimal::new(self.max_amount_cents, 2),
            is_active: true,
            require_director: self.require_director,
            require_finance: true,
            steps: self
                .steps
                .iter()
                .map(|step| StepTemplate {
                    id: StepTemplateId(format!("{}-step-{}", self.id, step.order)),
                    workflow_id: id.clone(),
                    step_order: step.order,
                    name: step.name.to_owned(),
                    approver_role: step.role.to_owned(),
                    is_optional: step.optional,
                    is_parallel: false,
                    time_limit_hours: 24,
                })
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SeedResult {
    pub users: usize,
    pub workflows_created: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub ok: bool,
    pub missing: Vec<String>,
}
