use rust_decimal::Decimal;

use crate::domain::workflow::{ApprovalModule, WorkflowTemplate};
use crate::errors::ApprovalError;

/// Picks the active template for `module` whose bracket covers `amount`.
/// Overlapping brackets resolve to the most specific one (highest
/// `min_amount`), then to the lowest id so the choice is stable.
pub fn select_workflow<'a>(
    workflows: &'a [WorkflowTemplate],
    module: ApprovalModule,
    amount: Decimal,
) -> Result<&'a WorkflowTemplate, ApprovalError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ApprovalError::InvalidAmount(amount));
    }

    workflows
        .iter()
        .filter(|workflow| workflow.is_active && workflow.module == module)
        .filter(|workflow| workflow.contains(amount))
        .max_by(|left, right| {
            left.min_amount.cmp(&right.min_amount).then_with(|| right.id.cmp(&left.id))
        })
        .ok_or(ApprovalError::NoWorkflowFound { module, amount })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::select_workflow;
    use crate::domain::workflow::{ApprovalModule, WorkflowId, WorkflowTemplate};
    use crate::errors::ApprovalError;

    fn workflow(id: &str, module: ApprovalModule, min: Decimal, max: Decimal) -> WorkflowTemplate {
        WorkflowTemplate {
            id: WorkflowId(id.to_owned()),
            name: id.to_owned(),
            module,
            min_amount: min,
            max_amount: max,
            is_active: true,
            require_director: false,
            require_finance: false,
            steps: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn purchase_brackets() -> Vec<WorkflowTemplate> {
        vec![
            workflow("wf-small", ApprovalModule::Purchase, Decimal::ZERO, Decimal::from(5_000_000)),
            workflow(
                "wf-large",
                ApprovalModule::Purchase,
                Decimal::new(500_000_001, 2),
                Decimal::ZERO,
            ),
            workflow("wf-sales", ApprovalModule::Sales, Decimal::ZERO, Decimal::ZERO),
        ]
    }

    #[test]
    fn amount_selects_the_covering_bracket() {
        let workflows = purchase_brackets();

        let small =
            select_workflow(&workflows, ApprovalModule::Purchase, Decimal::from(1_200_000))
                .expect("small bracket");
        assert_eq!(small.id.0, "wf-small");

        let edge = select_workflow(&workflows, ApprovalModule::Purchase, Decimal::from(5_000_000))
            .expect("upper bound is inclusive");
        assert_eq!(edge.id.0, "wf-small");

        let large =
            select_workflow(&workflows, ApprovalModule::Purchase, Decimal::from(80_000_000))
                .expect("unbounded bracket");
        assert_eq!(large.id.0, "wf-large");
    }

    #[test]
    fn gap_between_brackets_is_not_covered() {
        let workflows = vec![
            workflow("wf-a", ApprovalModule::Purchase, Decimal::ZERO, Decimal::from(100)),
            workflow("wf-b", ApprovalModule::Purchase, Decimal::from(200), Decimal::ZERO),
        ];

        let error = select_workflow(&workflows, ApprovalModule::Purchase, Decimal::from(150))
            .expect_err("gap");
        assert_eq!(
            error,
            ApprovalError::NoWorkflowFound {
                module: ApprovalModule::Purchase,
                amount: Decimal::from(150)
            }
        );
    }

    #[test]
    fn inactive_and_other_module_templates_are_ignored() {
        let mut workflows = purchase_brackets();
        workflows[0].is_active = false;

        let error = select_workflow(&workflows, ApprovalModule::Purchase, Decimal::from(10))
            .expect_err("only inactive bracket covers 10");
        assert!(matches!(error, ApprovalError::NoWorkflowFound { .. }));

        let sales = select_workflow(&workflows, ApprovalModule::Sales, Decimal::from(10))
            .expect("sales bracket");
        assert_eq!(sales.id.0, "wf-sales");
    }

    #[test]
    fn overlapping_brackets_prefer_the_highest_minimum_then_lowest_id() {
        let workflows = vec![
            workflow("wf-wide", ApprovalModule::Sales, Decimal::ZERO, Decimal::ZERO),
            workflow("wf-z", ApprovalModule::Sales, Decimal::from(1_000), Decimal::ZERO),
            workflow("wf-m", ApprovalModule::Sales, Decimal::from(1_000), Decimal::from(9_000)),
        ];

        let chosen = select_workflow(&workflows, ApprovalModule::Sales, Decimal::from(2_000))
            .expect("overlap");
        assert_eq!(chosen.id.0, "wf-m");

        let below = select_workflow(&workflows, ApprovalModule::Sales, Decimal::from(10))
            .expect("wide bracket");
        assert_eq!(below.id.0, "wf-wide");
    }

    #[test]
    fn negative_amount_is_rejected() {
        let error =
            select_workflow(&purchase_brackets(), ApprovalModule::Purchase, Decimal::from(-1))
                .expect_err("negative");
        assert_eq!(error, ApprovalError::InvalidAmount(Decimal::from(-1)));
    }
}
