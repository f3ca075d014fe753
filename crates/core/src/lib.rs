pub mod approvals;
pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod ports;

pub use approvals::{
    role_permits, select_workflow, Actor, ApprovalEngine, DecisionInput, DecisionOutcome,
    EnginePolicy, EntityStatusUpdate, EscalationOutcome, Instantiation, NewApprovalRequest,
    RoleResolver,
};
pub use domain::approval::{
    ApprovalCase, ApprovalPriority, ApprovalRequest, ApprovalRequestId, ApprovalStatus, Decision,
    EntityType, HistoryAction, HistoryEntry, StepAction, StepActionId, StepOrigin, UserId,
};
pub use domain::workflow::{
    ApprovalModule, NewStep, NewWorkflow, StepTemplate, StepTemplateId, WorkflowId,
    WorkflowTemplate,
};
pub use errors::{ApplicationError, ApprovalError, ErrorClass, InterfaceError};
pub use events::{OutboundEvent, RequestSummary};
pub use ports::{
    CollaboratorError, Notification, NotificationKind, Notifier, PostApprovalCallback,
    UserDirectory,
};
