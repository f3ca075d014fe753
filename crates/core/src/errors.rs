use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::approval::{ApprovalStatus, UserId};
use crate::domain::workflow::{ApprovalModule, WorkflowId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("unsupported entity type `{0}` (expected SALE or PURCHASE)")]
    UnsupportedEntityType(String),
    #[error("no active {module} workflow covers amount {amount}")]
    NoWorkflowFound { module: ApprovalModule, amount: Decimal },
    #[error("approval amount {0} must not be negative")]
    InvalidAmount(Decimal),
    #[error("invalid workflow definition: {0}")]
    InvalidWorkflow(String),
    #[error("workflow `{0}` has no steps")]
    EmptyWorkflow(WorkflowId),
    #[error("invalid decision `{0}` (expected APPROVE or REJECT)")]
    InvalidDecision(String),
    #[error("approval request is no longer pending (status {status})")]
    RequestNotPending { status: ApprovalStatus },
    #[error("no active approval step found for user `{user_id}`")]
    NoEligibleStep { user_id: UserId },
    #[error("approval invariant violation: {0}")]
    InvariantViolation(String),
}

impl ApprovalError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnsupportedEntityType(_)
            | Self::NoWorkflowFound { .. }
            | Self::InvalidAmount(_)
            | Self::InvalidWorkflow(_)
            | Self::EmptyWorkflow(_)
            | Self::InvalidDecision(_) => ErrorClass::Validation,
            Self::RequestNotPending { .. } | Self::NoEligibleStep { .. } => ErrorClass::State,
            Self::InvariantViolation(_) => ErrorClass::Invariant,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    State,
    Invariant,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::State => "state",
            Self::Invariant => "invariant",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("concurrent modification: {0}")]
    Conflict(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { .. } => {
                "The approval request changed while you were acting on it. Reload and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Approval(error) => match error.class() {
                ErrorClass::Validation => {
                    Self::BadRequest { message: error.to_string(), correlation_id }
                }
                ErrorClass::State => Self::Conflict { message: error.to_string(), correlation_id },
                ErrorClass::Invariant => {
                    Self::Internal { message: error.to_string(), correlation_id }
                }
            },
            ApplicationError::NotFound(message) => Self::BadRequest { message, correlation_id },
            ApplicationError::Conflict(message) => Self::Conflict { message, correlation_id },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::approval::{ApprovalStatus, UserId};
    use crate::domain::workflow::ApprovalModule;
    use crate::errors::{ApplicationError, ApprovalError, ErrorClass, InterfaceError};

    #[test]
    fn validation_errors_map_to_bad_request() {
        let interface = ApplicationError::from(ApprovalError::NoWorkflowFound {
            module: ApprovalModule::Purchase,
            amount: Decimal::from(10),
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn state_errors_map_to_conflict() {
        let error = ApprovalError::RequestNotPending { status: ApprovalStatus::Approved };
        assert_eq!(error.class(), ErrorClass::State);
        assert_eq!(error.to_string(), "approval request is no longer pending (status APPROVED)");

        let interface = ApplicationError::from(ApprovalError::NoEligibleStep {
            user_id: UserId("u-1".to_string()),
        })
        .into_interface("req-2");
        assert!(matches!(interface, InterfaceError::Conflict { .. }));
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn missing_request_maps_to_bad_request() {
        let interface = ApplicationError::NotFound("approval request `req-9`".to_owned())
            .into_interface("req-5");
        assert!(matches!(interface, InterfaceError::BadRequest { ref message, .. } if message.contains("req-9")));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("bad database url".to_owned()).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
