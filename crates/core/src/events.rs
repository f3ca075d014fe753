use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::approval::{
    ApprovalPriority, ApprovalRequest, ApprovalRequestId, ApprovalStatus, EntityType, UserId,
};
use crate::ports::{Notification, NotificationKind};

/// Snapshot of the request fields a side effect needs, taken inside the
/// transaction that produced the event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub request_id: ApprovalRequestId,
    pub request_code: String,
    pub title: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub amount: Decimal,
    pub status: ApprovalStatus,
    pub priority: ApprovalPriority,
    pub requester_id: UserId,
}

impl From<&ApprovalRequest> for RequestSummary {
    fn from(request: &ApprovalRequest) -> Self {
        Self {
            request_id: request.id.clone(),
            request_code: request.request_code.clone(),
            title: request.title.clone(),
            entity_type: request.entity_type,
            entity_id: request.entity_id.clone(),
            amount: request.amount,
            status: request.status,
            priority: request.priority,
            requester_id: request.requester_id.clone(),
        }
    }
}

impl RequestSummary {
    pub fn payload(&self) -> Value {
        json!({
            "request_id": self.request_id.0,
            "request_code": self.request_code,
            "entity_type": self.entity_type.as_str(),
            "entity_id": self.entity_id,
            "amount": self.amount.to_string(),
            "status": self.status.as_str(),
        })
    }
}

/// Side effects recorded in the outbox and delivered after commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundEvent {
    ApprovalNeeded { request: RequestSummary, approver_role: String, step_name: String },
    DirectorEscalation { request: RequestSummary, reason: String },
    RequestCompleted { request: RequestSummary },
    PurchaseApproved { request_id: ApprovalRequestId, entity_id: String },
}

impl OutboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ApprovalNeeded { .. } => "approval_needed",
            Self::DirectorEscalation { .. } => "director_escalation",
            Self::RequestCompleted { .. } => "request_completed",
            Self::PurchaseApproved { .. } => "purchase_approved",
        }
    }

    pub fn request_id(&self) -> &ApprovalRequestId {
        match self {
            Self::ApprovalNeeded { request, .. }
            | Self::DirectorEscalation { request, .. }
            | Self::RequestCompleted { request } => &request.request_id,
            Self::PurchaseApproved { request_id, .. } => request_id,
        }
    }
}

/// Recipients are filled in by the dispatcher once it has resolved them.
pub fn approval_needed_notification(
    request: &RequestSummary,
    recipients: Vec<UserId>,
) -> Notification {
    Notification {
        user_ids: recipients,
        kind: NotificationKind::ApprovalPending,
        title: format!("Approval Required: {}", request.title),
        message: format!(
            "You have a pending approval request for {} (Amount: {})",
            request.title,
            format_amount(request.amount)
        ),
        priority: request.priority,
        request_id: request.request_id.clone(),
        payload: request.payload(),
        deduplicate: true,
    }
}

pub fn director_escalation_notification(
    request: &RequestSummary,
    reason: &str,
    recipients: Vec<UserId>,
) -> Notification {
    Notification {
        user_ids: recipients,
        kind: NotificationKind::ApprovalPending,
        title: format!("URGENT: Director Approval Required - {}", request.title),
        message: format!(
            "Finance has escalated this request: {}. Reason: {} (Amount: {})",
            request.title,
            reason,
            format_amount(request.amount)
        ),
        priority: ApprovalPriority::Urgent,
        request_id: request.request_id.clone(),
        payload: request.payload(),
        deduplicate: false,
    }
}

/// `None` while the request is still pending; intermediate approvals do not
/// reach the requester.
pub fn requester_notification(request: &RequestSummary) -> Option<Notification> {
    let (kind, title, verb) = match request.status {
        ApprovalStatus::Approved => {
            (NotificationKind::ApprovalApproved, "Request Approved", "approved")
        }
        ApprovalStatus::Rejected => {
            (NotificationKind::ApprovalRejected, "Request Rejected", "rejected")
        }
        ApprovalStatus::Pending => return None,
    };

    Some(Notification {
        user_ids: vec![request.requester_id.clone()],
        kind,
        title: title.to_owned(),
        message: format!("Your request '{}' has been {verb}", request.title),
        priority: request.priority,
        request_id: request.request_id.clone(),
        payload: request.payload(),
        deduplicate: true,
    })
}

/// Whole units with `.` thousands separators, the way the ledger prints
/// amounts to users.
pub fn format_amount(amount: Decimal) -> String {
    let rounded = amount.round().abs().to_string();
    let digits = rounded.split('.').next().unwrap_or_default();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }
    if amount.is_sign_negative() && !amount.round().is_zero() {
        format!("-{grouped}")
    } else {
        grouped
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        approval_needed_notification, director_escalation_notification, format_amount,
        requester_notification, OutboundEvent, RequestSummary,
    };
    use crate::domain::approval::{
        ApprovalPriority, ApprovalRequestId, ApprovalStatus, EntityType, UserId,
    };
    use crate::ports::NotificationKind;

    fn summary(status: ApprovalStatus) -> RequestSummary {
        RequestSummary {
            request_id: ApprovalRequestId("req-1".to_owned()),
            request_code: "APP-PUR-20261018093000".to_owned(),
            title: "PO-2026-0007".to_owned(),
            entity_type: EntityType::Purchase,
            entity_id: "po-7".to_owned(),
            amount: Decimal::from(1_200_000),
            status,
            priority: ApprovalPriority::Normal,
            requester_id: UserId("u-employee".to_owned()),
        }
    }

    #[test]
    fn amounts_are_grouped_in_whole_units() {
        assert_eq!(format_amount(Decimal::from(1_200_000)), "1.200.000");
        assert_eq!(format_amount(Decimal::new(99_950, 2)), "1.000");
        assert_eq!(format_amount(Decimal::from(999)), "999");
        assert_eq!(format_amount(Decimal::ZERO), "0");
    }

    #[test]
    fn approval_needed_uses_request_priority_and_dedup() {
        let notification =
            approval_needed_notification(&summary(ApprovalStatus::Pending), Vec::new());
        assert_eq!(notification.title, "Approval Required: PO-2026-0007");
        assert_eq!(notification.kind, NotificationKind::ApprovalPending);
        assert_eq!(notification.priority, ApprovalPriority::Normal);
        assert!(notification.deduplicate);
        assert_eq!(notification.payload["request_id"], "req-1");
        assert_eq!(notification.payload["amount"], "1200000");
    }

    #[test]
    fn escalation_is_urgent_and_carries_the_reason() {
        let notification = director_escalation_notification(
            &summary(ApprovalStatus::Pending),
            "over budget",
            vec![UserId("u-director".to_owned())],
        );
        assert_eq!(notification.title, "URGENT: Director Approval Required - PO-2026-0007");
        assert!(notification.message.contains("Reason: over budget"));
        assert_eq!(notification.priority, ApprovalPriority::Urgent);
        assert!(!notification.deduplicate);
    }

    #[test]
    fn requester_hears_only_about_final_outcomes() {
        assert!(requester_notification(&summary(ApprovalStatus::Pending)).is_none());

        let approved =
            requester_notification(&summary(ApprovalStatus::Approved)).expect("approved");
        assert_eq!(approved.title, "Request Approved");
        assert_eq!(approved.user_ids, vec![UserId("u-employee".to_owned())]);

        let rejected =
            requester_notification(&summary(ApprovalStatus::Rejected)).expect("rejected");
        assert_eq!(rejected.kind, NotificationKind::ApprovalRejected);
        assert_eq!(rejected.message, "Your request 'PO-2026-0007' has been rejected");
    }

    #[test]
    fn events_serialize_with_a_kind_tag() {
        let event = OutboundEvent::PurchaseApproved {
            request_id: ApprovalRequestId("req-1".to_owned()),
            entity_id: "po-7".to_owned(),
        };
        let encoded = serde_json::to_value(&event).expect("serialize");
        assert_eq!(encoded["kind"], "purchase_approved");
        assert_eq!(event.kind(), "purchase_approved");
        assert_eq!(event.request_id().0, "req-1");
    }
}
