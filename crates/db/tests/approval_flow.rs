use std::sync::Arc;

use rust_decimal::Decimal;

use approvo_core::approvals::NewApprovalRequest;
use approvo_core::domain::approval::{
    ApprovalCase, ApprovalStatus, Decision, EntityType, HistoryAction, StepOrigin, UserId,
};
use approvo_core::errors::ApprovalError;
use approvo_core::ports::{
    DirectoryUser, InMemoryUserDirectory, RecordingNotifier, RecordingPostApprovalCallback,
};
use approvo_db::repositories::{entity, user};
use approvo_db::{
    connect_with_settings, migrations, ApprovalService, DbPool, DemoSeed, OutboxDispatcher,
    ServiceError,
};

async fn seeded_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    DemoSeed::load(&pool).await.expect("seed");
    pool
}

fn user_id(id: &str) -> UserId {
    UserId(id.to_owned())
}

fn new_request(entity_type: &str, amount: Decimal) -> NewApprovalRequest {
    NewApprovalRequest {
        entity_type: entity_type.to_owned(),
        entity_id: format!("{}-1", entity_type.to_ascii_lowercase()),
        amount,
        requester_id: user_id("u-employee"),
        title: format!("{entity_type} order"),
        message: "Quarterly restock".to_owned(),
        priority: None,
    }
}

fn active_role(case: &ApprovalCase) -> Option<&str> {
    case.active_step().map(|step| step.approver_role.as_str())
}

#[tokio::test]
async fn purchase_of_1_200_000_walks_employee_then_finance() {
    let pool = seeded_pool().await;
    let service = ApprovalService::new(pool.clone());

    let case = service
        .create_request(new_request("PURCHASE", Decimal::from(1_200_000)))
        .await
        .expect("create");
    assert_eq!(case.request.workflow_id.0, "wf-purchase-standard");
    assert_eq!(active_role(&case), Some("employee"));
    assert!(case.request.request_code.starts_with("APP-PUR-"));

    let after_employee = service
        .process_decision(&case.request.id, &user_id("u-employee"), Decision::Approve, "ok")
        .await
        .expect("employee approves");
    assert_eq!(active_role(&after_employee.case), Some("finance"));

    let done = service
        .process_decision(&case.request.id, &user_id("u-finance"), Decision::Approve, "paid")
        .await
        .expect("finance approves");
    assert_eq!(done.case.request.status, ApprovalStatus::Approved);
    assert!(done.case.steps.iter().all(|step| step.status == ApprovalStatus::Approved));
    assert!(done.case.request.completed_at.is_some());

    let mut conn = pool.acquire().await.expect("acquire");
    let entity = entity::find_entity_status(&mut conn, EntityType::Purchase, "purchase-1")
        .await
        .expect("entity")
        .expect("entity row");
    assert_eq!(entity.status, "APPROVED");
    assert!(entity.approved_at.is_some());
    drop(conn);

    let callback = RecordingPostApprovalCallback::default();
    let dispatcher = OutboxDispatcher::new(
        pool.clone(),
        Arc::new(InMemoryUserDirectory::default()),
        Arc::new(RecordingNotifier::default()),
        Arc::new(callback.clone()),
    );
    dispatcher.dispatch_pending().await.expect("dispatch");
    assert_eq!(callback.entity_ids(), vec!["purchase-1".to_owned()]);

    let error = service
        .process_decision(&case.request.id, &user_id("u-finance"), Decision::Reject, "late")
        .await
        .expect_err("terminal request");
    assert!(matches!(
        error,
        ServiceError::Approval(ApprovalError::RequestNotPending { status: ApprovalStatus::Approved })
    ));
}

#[tokio::test]
async fn large_purchase_lands_in_the_director_bracket() {
    let pool = seeded_pool().await;
    let service = ApprovalService::new(pool);

    let case = service
        .create_request(new_request("PURCHASE", Decimal::new(500_000_001, 2)))
        .await
        .expect("create");
    assert_eq!(case.request.workflow_id.0, "wf-purchase-large");
    assert_eq!(case.steps.len(), 3);
}

#[tokio::test]
async fn optional_director_stays_dormant_for_sales() {
    let pool = seeded_pool().await;
    let service = ApprovalService::new(pool.clone());

    let case =
        service.create_request(new_request("sale", Decimal::from(250_000))).await.expect("create");
    for approver in ["u-employee", "u-finance"] {
        service
            .process_decision(&case.request.id, &user_id(approver), Decision::Approve, "")
            .await
            .expect("approve");
    }

    let reloaded = service.get_request(&case.request.id).await.expect("reload");
    assert_eq!(reloaded.request.status, ApprovalStatus::Approved);
    let director = reloaded.director_step().expect("director step");
    assert_eq!(director.status, ApprovalStatus::Pending);
    assert!(reloaded.request.active_step.is_none());

    let callback = RecordingPostApprovalCallback::default();
    let dispatcher = OutboxDispatcher::new(
        pool.clone(),
        Arc::new(InMemoryUserDirectory::default()),
        Arc::new(RecordingNotifier::default()),
        Arc::new(callback.clone()),
    );
    let report = dispatcher.dispatch_pending().await.expect("dispatch");
    assert!(report.claimed > 0);
    assert_eq!(report.failed, 0);
    assert!(callback.entity_ids().is_empty());
}

#[tokio::test]
async fn rejected_purchase_never_reaches_the_post_approval_callback() {
    let pool = seeded_pool().await;
    let service = ApprovalService::new(pool.clone());

    let case = service
        .create_request(new_request("PURCHASE", Decimal::from(1_200_000)))
        .await
        .expect("create");
    let rejected = service
        .process_decision(&case.request.id, &user_id("u-employee"), Decision::Reject, "duplicate")
        .await
        .expect("reject");
    assert_eq!(rejected.case.request.status, ApprovalStatus::Rejected);

    let callback = RecordingPostApprovalCallback::default();
    let dispatcher = OutboxDispatcher::new(
        pool,
        Arc::new(InMemoryUserDirectory::default()),
        Arc::new(RecordingNotifier::default()),
        Arc::new(callback.clone()),
    );
    let report = dispatcher.dispatch_pending().await.expect("dispatch");
    assert_eq!(report.failed, 0);
    assert!(callback.entity_ids().is_empty());
}

#[tokio::test]
async fn finance_director_cascade_clears_the_director_step() {
    let pool = seeded_pool().await;
    {
        let mut conn = pool.acquire().await.expect("acquire");
        let dual = DirectoryUser {
            id: user_id("u-cfo"),
            name: "Casey CFO".to_owned(),
            role: "director".to_owned(),
            is_active: true,
        };
        user::upsert_user(&mut conn, &dual, chrono::Utc::now()).await.expect("user");
    }
    let service = ApprovalService::new(pool);

    let case = service
        .create_request(new_request("PURCHASE", Decimal::from(9_000_000)))
        .await
        .expect("create");
    service
        .process_decision(&case.request.id, &user_id("u-employee"), Decision::Approve, "")
        .await
        .expect("employee");

    let outcome = service
        .process_decision(&case.request.id, &user_id("u-cfo"), Decision::Approve, "both hats")
        .await
        .expect("finance step by director");
    assert_eq!(outcome.auto_approved.len(), 1);
    assert_eq!(outcome.case.request.status, ApprovalStatus::Approved);

    let director = outcome.case.director_step().expect("director step");
    assert_eq!(director.approver_id, Some(user_id("u-cfo")));

    let history = service.history(&case.request.id).await.expect("history");
    let auto = history
        .iter()
        .find(|entry| entry.metadata["auto_approved"] == serde_json::json!(true))
        .expect("auto-approval audited");
    assert_eq!(auto.action, HistoryAction::Approved);
    assert_eq!(auto.user_id, user_id("u-cfo"));
}

#[tokio::test]
async fn double_escalation_keeps_one_director_step_and_resumes_finance() {
    let pool = seeded_pool().await;
    let service = ApprovalService::new(pool);

    let case = service
        .create_request(new_request("PURCHASE", Decimal::from(1_200_000)))
        .await
        .expect("create");
    service
        .process_decision(&case.request.id, &user_id("u-employee"), Decision::Approve, "")
        .await
        .expect("employee");

    let first = service
        .escalate_to_director(&case.request.id, &user_id("u-finance"), "unusual vendor")
        .await
        .expect("first escalation");
    assert!(first.step_created);
    let second = service
        .escalate_to_director(&case.request.id, &user_id("u-finance"), "still unusual")
        .await
        .expect("second escalation");
    assert!(!second.step_created);
    assert_eq!(first.director_step, second.director_step);

    let reloaded = service.get_request(&case.request.id).await.expect("reload");
    let directors: Vec<_> = reloaded.steps.iter().filter(|step| step.is_director()).collect();
    assert_eq!(directors.len(), 1);
    assert_eq!(directors[0].origin, StepOrigin::Escalation);
    assert_eq!(active_role(&reloaded), Some("director"));

    // The director also holds the finance gate, so the parked finance step is
    // cleared by the cascade.
    let after_director = service
        .process_decision(&case.request.id, &user_id("u-director"), Decision::Approve, "fine")
        .await
        .expect("director");
    assert_eq!(after_director.auto_approved.len(), 1);
    assert_eq!(after_director.case.request.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn without_cascade_escalation_returns_to_the_parked_step() {
    let pool = seeded_pool().await;
    let config = approvo_core::config::ApprovalsConfig {
        auto_approve_multi_role: false,
        ..Default::default()
    };
    let service = ApprovalService::from_config(pool, &config);

    let case = service
        .create_request(new_request("PURCHASE", Decimal::from(1_200_000)))
        .await
        .expect("create");
    service
        .process_decision(&case.request.id, &user_id("u-employee"), Decision::Approve, "")
        .await
        .expect("employee");
    let escalation = service
        .escalate_to_director(&case.request.id, &user_id("u-finance"), "unusual vendor")
        .await
        .expect("escalate");
    assert_eq!(escalation.case.request.priority, approvo_core::ApprovalPriority::High);

    let after_director = service
        .process_decision(&case.request.id, &user_id("u-director"), Decision::Approve, "fine")
        .await
        .expect("director");
    assert_eq!(active_role(&after_director.case), Some("finance"));

    let done = service
        .process_decision(&case.request.id, &user_id("u-finance"), Decision::Approve, "")
        .await
        .expect("finance");
    assert_eq!(done.case.request.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn racing_approvals_on_one_step_apply_exactly_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("race.db").display());
    let pool = connect_with_settings(&url, 4, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    DemoSeed::load(&pool).await.expect("seed");
    {
        let mut conn = pool.acquire().await.expect("acquire");
        let second = DirectoryUser {
            id: user_id("u-finance-2"),
            name: "Second analyst".to_owned(),
            role: "finance".to_owned(),
            is_active: true,
        };
        user::upsert_user(&mut conn, &second, chrono::Utc::now()).await.expect("user");
    }

    let service = ApprovalService::new(pool.clone());
    let case = service
        .create_request(new_request("PURCHASE", Decimal::from(1_200_000)))
        .await
        .expect("create");
    service
        .process_decision(&case.request.id, &user_id("u-employee"), Decision::Approve, "")
        .await
        .expect("employee");

    let first = user_id("u-finance");
    let second = user_id("u-finance-2");
    let (left, right) = tokio::join!(
        service.process_decision(&case.request.id, &first, Decision::Approve, "left"),
        service.process_decision(&case.request.id, &second, Decision::Approve, "right"),
    );

    let successes = [left.is_ok(), right.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1, "exactly one racer wins");
    for result in [left, right] {
        if let Err(error) = result {
            assert!(
                matches!(
                    error,
                    ServiceError::Approval(ApprovalError::RequestNotPending { .. })
                        | ServiceError::Conflict { .. }
                ),
                "unexpected loser error: {error}"
            );
        }
    }

    let history = service.history(&case.request.id).await.expect("history");
    let finance_approvals = history
        .iter()
        .filter(|entry| {
            entry.action == HistoryAction::Approved && entry.metadata["approver_role"] == "finance"
        })
        .count();
    assert_eq!(finance_approvals, 1);
    pool.close().await;
}
