use approvo_core::domain::approval::{ApprovalRequestId, Decision, StepActionId, UserId};
use approvo_db::ApprovalService;
use serde::Serialize;

use crate::commands::request::CaseSummary;
use crate::commands::{run_with_pool, service_failure, CommandResult};

#[derive(Debug, Serialize)]
struct DecisionSummary<'a> {
    decided_step: &'a StepActionId,
    auto_approved: &'a [StepActionId],
    activated: Option<&'a StepActionId>,
    #[serde(flatten)]
    request: CaseSummary<'a>,
}

pub fn run(request_id: &str, user_id: &str, decision: &str, comments: &str) -> CommandResult {
    let decision = match Decision::parse(decision) {
        Ok(decision) => decision,
        Err(error) => return CommandResult::failure("decide", "bad_request", error.to_string(), 7),
    };

    let id = ApprovalRequestId(request_id.to_string());
    let user = UserId(user_id.to_string());
    let comments = comments.to_string();
    let result = run_with_pool("decide", |config, pool| async move {
        let service = ApprovalService::from_config(pool, &config.approvals);
        service
            .process_decision(&id, &user, decision, &comments)
            .await
            .map_err(|error| service_failure(error, &id.0))
    });

    match result {
        Ok(outcome) => {
            let summary = DecisionSummary {
                decided_step: &outcome.decided_step,
                auto_approved: &outcome.auto_approved,
                activated: outcome.activated.as_ref(),
                request: CaseSummary::of(&outcome.case),
            };
            CommandResult::success_with_data(
                "decide",
                format!(
                    "{} by {user_id}; {} is {}",
                    decision.as_str(),
                    outcome.case.request.request_code,
                    outcome.case.request.status.as_str()
                ),
                &summary,
            )
        }
        Err(failure) => failure,
    }
}
