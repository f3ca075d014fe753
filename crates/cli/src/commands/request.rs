use approvo_core::domain::approval::{
    ApprovalCase, ApprovalPriority, ApprovalRequestId, ApprovalStatus, UserId,
};
use approvo_core::domain::workflow::ApprovalModule;
use approvo_core::NewApprovalRequest;
use approvo_db::{ApprovalService, RequestFilter};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::commands::{run_with_pool, service_failure, CommandResult, Failure};

#[derive(Clone, Debug)]
pub struct CreateArgs {
    pub entity_type: String,
    pub entity_id: String,
    pub amount: Decimal,
    pub requester: String,
    pub title: String,
    pub message: String,
    pub priority: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ListArgs {
    pub status: Option<String>,
    pub module: Option<String>,
    pub requester: Option<String>,
    pub visible_to: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Compact view of a request used in command output.
#[derive(Debug, Serialize)]
pub(crate) struct CaseSummary<'a> {
    pub request_id: &'a str,
    pub request_code: &'a str,
    pub status: ApprovalStatus,
    pub active_role: Option<&'a str>,
    pub case: &'a ApprovalCase,
}

impl<'a> CaseSummary<'a> {
    pub(crate) fn of(case: &'a ApprovalCase) -> Self {
        Self {
            request_id: &case.request.id.0,
            request_code: &case.request.request_code,
            status: case.request.status,
            active_role: case.active_step().map(|step| step.approver_role.as_str()),
            case,
        }
    }
}

pub fn create(args: CreateArgs) -> CommandResult {
    let priority = match args.priority.as_deref().map(parse_priority).transpose() {
        Ok(priority) => priority,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("request.create", error_class, message, exit_code);
        }
    };

    let result = run_with_pool("request.create", |config, pool| async move {
        let service = ApprovalService::from_config(pool, &config.approvals);
        service
            .create_request(NewApprovalRequest {
                entity_type: args.entity_type,
                entity_id: args.entity_id.clone(),
                amount: args.amount,
                requester_id: UserId(args.requester),
                title: args.title,
                message: args.message,
                priority,
            })
            .await
            .map_err(|error| service_failure(error, &args.entity_id))
    });

    match result {
        Ok(case) => CommandResult::success_with_data(
            "request.create",
            format!(
                "created {} on workflow {}",
                case.request.request_code, case.request.workflow_id.0
            ),
            &CaseSummary::of(&case),
        ),
        Err(failure) => failure,
    }
}

pub fn show(request_id: &str) -> CommandResult {
    let id = ApprovalRequestId(request_id.to_string());
    let result = run_with_pool("request.show", |config, pool| async move {
        let service = ApprovalService::from_config(pool, &config.approvals);
        service.get_request(&id).await.map_err(|error| service_failure(error, &id.0))
    });

    match result {
        Ok(case) => CommandResult::success_with_data(
            "request.show",
            format!("{} is {}", case.request.request_code, case.request.status.as_str()),
            &CaseSummary::of(&case),
        ),
        Err(failure) => failure,
    }
}

pub fn history(request_id: &str) -> CommandResult {
    let id = ApprovalRequestId(request_id.to_string());
    let result = run_with_pool("request.history", |config, pool| async move {
        let service = ApprovalService::from_config(pool, &config.approvals);
        service.history(&id).await.map_err(|error| service_failure(error, &id.0))
    });

    match result {
        Ok(entries) => CommandResult::success_with_data(
            "request.history",
            format!("{} history entries", entries.len()),
            &entries,
        ),
        Err(failure) => failure,
    }
}

pub fn pending(user_id: &str) -> CommandResult {
    let user = UserId(user_id.to_string());
    let result = run_with_pool("request.pending", |config, pool| async move {
        let service = ApprovalService::from_config(pool, &config.approvals);
        service.pending_for_user(&user).await.map_err(|error| service_failure(error, &user.0))
    });

    match result {
        Ok(cases) => {
            let summaries = cases.iter().map(CaseSummary::of).collect::<Vec<_>>();
            CommandResult::success_with_data(
                "request.pending",
                format!("{} requests awaiting {user_id}", cases.len()),
                &summaries,
            )
        }
        Err(failure) => failure,
    }
}

pub fn list(args: ListArgs) -> CommandResult {
    let filter = match build_filter(args) {
        Ok(filter) => filter,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("request.list", error_class, message, exit_code);
        }
    };

    let result = run_with_pool("request.list", |config, pool| async move {
        let service = ApprovalService::from_config(pool, &config.approvals);
        service.list_requests(&filter).await.map_err(|error| service_failure(error, "list"))
    });

    match result {
        Ok(requests) => CommandResult::success_with_data(
            "request.list",
            format!("{} requests", requests.len()),
            &requests,
        ),
        Err(failure) => failure,
    }
}

fn parse_priority(value: &str) -> Result<ApprovalPriority, Failure> {
    ApprovalPriority::parse(value).ok_or_else(|| {
        ("bad_request", format!("unknown priority `{value}` (expected LOW|NORMAL|HIGH|URGENT)"), 7)
    })
}

fn build_filter(args: ListArgs) -> Result<RequestFilter, Failure> {
    let status = args
        .status
        .as_deref()
        .map(|value| {
            ApprovalStatus::parse(value).ok_or_else(|| {
                ("bad_request", format!("unknown status `{value}` (expected PENDING|APPROVED|REJECTED)"), 7u8)
            })
        })
        .transpose()?;
    let module = args
        .module
        .as_deref()
        .map(|value| {
            ApprovalModule::parse(value).ok_or_else(|| {
                ("bad_request", format!("unknown module `{value}` (expected SALES|PURCHASE)"), 7u8)
            })
        })
        .transpose()?;

    Ok(RequestFilter {
        status,
        module,
        requester_id: args.requester.map(UserId),
        visible_to: args.visible_to.map(UserId),
        limit: args.limit,
        offset: args.offset,
    })
}
