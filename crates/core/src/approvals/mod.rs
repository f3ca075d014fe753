pub mod engine;
pub mod roles;
pub mod selector;

pub use engine::{
    is_complete, request_code, ApprovalEngine, DecisionInput, DecisionOutcome, EnginePolicy,
    EntityStatusUpdate, EscalationOutcome, Instantiation, NewApprovalRequest,
};
pub use roles::{role_permits, Actor, RoleResolver};
pub use selector::select_workflow;
