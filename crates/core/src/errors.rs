use thiserror::Error;

use crate::domain::assignment::AssignmentStatus;
use crate::domain::order::OrderStatus;
use crate::domain::request::{RequestEvent, RequestStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("request in status {from:?} cannot handle {event:?}")]
    InvalidRequestTransition { from: RequestStatus, event: RequestEvent },
    #[error("assignment {id} was already resolved as {status:?}")]
    AssignmentAlreadyResolved { id: String, status: AssignmentStatus },
    #[error("invalid order transition from {from:?} to {to:?}")]
    InvalidOrderTransition { from: OrderStatus, to: OrderStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures surfaced by workflow operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        *mapped.correlation_id_mut() = correlation_id;
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("method not supported: {message}")]
    MethodNotSupported { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("precondition failed: {message}")]
    PreconditionFailed { message: String, correlation_id: String },
    #[error("bad gateway: {message}")]
    BadGateway { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    /// Wire name used by RPC clients to classify the failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::MethodNotSupported { .. } => "METHOD_NOT_SUPPORTED",
            Self::Conflict { .. } => "CONFLICT",
            Self::PreconditionFailed { .. } => "PRECONDITION_FAILED",
            Self::BadGateway { .. } => "BAD_GATEWAY",
            Self::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            Self::Internal { .. } => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::Unauthorized { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::MethodNotSupported { .. } => 405,
            Self::Conflict { .. } => 409,
            Self::PreconditionFailed { .. } => 412,
            Self::BadGateway { .. } => 502,
            Self::ServiceUnavailable { .. } => 503,
            Self::Internal { .. } => 500,
        }
    }

    /// JSON-RPC numeric code.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::BadRequest { .. } => -32600,
            Self::Unauthorized { .. } => -32001,
            Self::Forbidden { .. } => -32003,
            Self::NotFound { .. } => -32004,
            Self::MethodNotSupported { .. } => -32005,
            Self::Conflict { .. } => -32009,
            Self::PreconditionFailed { .. } => -32012,
            Self::BadGateway { .. } | Self::ServiceUnavailable { .. } | Self::Internal { .. } => {
                -32603
            }
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Unauthorized { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::MethodNotSupported { message, .. }
            | Self::Conflict { message, .. }
            | Self::PreconditionFailed { message, .. }
            | Self::BadGateway { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::MethodNotSupported { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::PreconditionFailed { correlation_id, .. }
            | Self::BadGateway { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    fn correlation_id_mut(&mut self) -> &mut String {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::MethodNotSupported { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::PreconditionFailed { correlation_id, .. }
            | Self::BadGateway { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    /// Message safe to show callers when the detailed message must stay internal.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Unauthorized { .. } => "The caller could not be identified.",
            Self::Forbidden { .. } => "The caller is not allowed to perform this action.",
            Self::NotFound { .. } => "The requested resource does not exist.",
            Self::MethodNotSupported { .. } => "Retry the procedure with the other HTTP method.",
            Self::Conflict { .. } => "The resource was changed concurrently. Reload and retry.",
            Self::PreconditionFailed { .. } => {
                "The consultation is not in a state that allows this action."
            }
            Self::BadGateway { .. } => "The payment provider could not complete the request.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    /// Whether `message` may be returned verbatim. Infrastructure failures only expose `user_message`.
    pub fn exposes_detail(&self) -> bool {
        !matches!(
            self,
            Self::BadGateway { .. } | Self::ServiceUnavailable { .. } | Self::Internal { .. }
        )
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Validation(message) => Self::BadRequest { message, correlation_id },
            ApplicationError::NotFound { entity, id } => {
                Self::NotFound { message: format!("{entity} {id} not found"), correlation_id }
            }
            ApplicationError::Conflict(message) => Self::Conflict { message, correlation_id },
            ApplicationError::State(message) => {
                Self::PreconditionFailed { message, correlation_id }
            }
            ApplicationError::Forbidden(message) => Self::Forbidden { message, correlation_id },
            ApplicationError::Upstream(message) => Self::BadGateway { message, correlation_id },
            ApplicationError::Domain(
                error @ (DomainError::InvalidRequestTransition { .. }
                | DomainError::InvalidOrderTransition { .. }),
            ) => Self::PreconditionFailed { message: error.to_string(), correlation_id },
            ApplicationError::Domain(error @ DomainError::AssignmentAlreadyResolved { .. }) => {
                Self::Conflict { message: error.to_string(), correlation_id }
            }
            ApplicationError::Domain(DomainError::InvariantViolation(message)) => {
                Self::BadRequest { message, correlation_id }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::assignment::AssignmentStatus;
    use crate::domain::request::{RequestEvent, RequestStatus};
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn validation_error_maps_to_bad_request_with_correlation_id() {
        let interface =
            ApplicationError::Validation("summary must not be empty".to_owned()).into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(interface.code(), "BAD_REQUEST");
        assert_eq!(interface.http_status(), 400);
    }

    #[test]
    fn state_error_maps_to_precondition_failed() {
        let interface = ApplicationError::State("request is not accepted".to_owned())
            .into_interface("req-2");

        assert_eq!(interface.code(), "PRECONDITION_FAILED");
        assert_eq!(interface.http_status(), 412);
        assert_eq!(interface.message(), "request is not accepted");
    }

    #[test]
    fn replayed_response_maps_to_conflict() {
        let interface = ApplicationError::from(DomainError::AssignmentAlreadyResolved {
            id: "ASG-1".to_owned(),
            status: AssignmentStatus::Declined,
        })
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(interface.rpc_code(), -32009);
    }

    #[test]
    fn invalid_request_transition_maps_to_precondition_failed() {
        let interface = ApplicationError::from(DomainError::InvalidRequestTransition {
            from: RequestStatus::Paid,
            event: RequestEvent::CloseRequested,
        })
        .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::PreconditionFailed { .. }));
    }

    #[test]
    fn upstream_error_hides_gateway_detail() {
        let interface =
            ApplicationError::Upstream("tls handshake failed".to_owned()).into_interface("req-5");

        assert_eq!(interface.http_status(), 502);
        assert!(!interface.exposes_detail());
        assert_eq!(
            interface.user_message(),
            "The payment provider could not complete the request."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-6");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-6");
    }

    #[test]
    fn not_found_names_the_entity() {
        let interface = ApplicationError::not_found("assignment", "ASG-9").into_interface("req-7");
        assert_eq!(interface.message(), "assignment ASG-9 not found");
        assert_eq!(interface.http_status(), 404);
    }
}
