use approvo_core::domain::approval::{ApprovalRequestId, StepActionId, UserId};
use approvo_db::ApprovalService;
use serde::Serialize;

use crate::commands::request::CaseSummary;
use crate::commands::{run_with_pool, service_failure, CommandResult};

#[derive(Debug, Serialize)]
struct EscalationSummary<'a> {
    director_step: &'a StepActionId,
    step_created: bool,
    previous_active_step: Option<&'a StepActionId>,
    #[serde(flatten)]
    request: CaseSummary<'a>,
}

pub fn run(request_id: &str, user_id: &str, reason: &str) -> CommandResult {
    let id = ApprovalRequestId(request_id.to_string());
    let user = UserId(user_id.to_string());
    let reason = reason.to_string();
    let result = run_with_pool("escalate", |config, pool| async move {
        let service = ApprovalService::from_config(pool, &config.approvals);
        service
            .escalate_to_director(&id, &user, &reason)
            .await
            .map_err(|error| service_failure(error, &id.0))
    });

    match result {
        Ok(outcome) => {
            let message = if outcome.step_created {
                format!("{} escalated; director step added", outcome.case.request.request_code)
            } else {
                format!("{} escalated to the existing director step", outcome.case.request.request_code)
            };
            let summary = EscalationSummary {
                director_step: &outcome.director_step,
                step_created: outcome.step_created,
                previous_active_step: outcome.previous_active_step.as_ref(),
                request: CaseSummary::of(&outcome.case),
            };
            CommandResult::success_with_data("escalate", message, &summary)
        }
        Err(failure) => failure,
    }
}
