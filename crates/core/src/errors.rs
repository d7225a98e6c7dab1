use thiserror::Error;

use crate::capability::Endpoint;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// The request body or query could not be decoded into a turn.
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failure of a single downstream call. Every variant counts against the
/// endpoint's circuit breaker.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("capability `{endpoint}` is unavailable: circuit open")]
    CircuitOpen { endpoint: Endpoint },
    #[error("capability `{endpoint}` timed out after {timeout_ms}ms")]
    Timeout { endpoint: Endpoint, timeout_ms: u64 },
    #[error("capability `{endpoint}` transport failure: {message}")]
    Transport { endpoint: Endpoint, message: String },
    #[error("capability `{endpoint}` returned an invalid payload: {message}")]
    InvalidResponse { endpoint: Endpoint, message: String },
    #[error("capability `{endpoint}` rejected the call: {message}")]
    Rejected { endpoint: Endpoint, message: String },
}

impl CapabilityError {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Self::CircuitOpen { endpoint }
            | Self::Timeout { endpoint, .. }
            | Self::Transport { endpoint, .. }
            | Self::InvalidResponse { endpoint, .. }
            | Self::Rejected { endpoint, .. } => *endpoint,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Rejected { .. } => "rejected",
        }
    }

    pub fn transport(endpoint: Endpoint, message: impl Into<String>) -> Self {
        Self::Transport { endpoint, message: message.into() }
    }

    pub fn invalid_response(endpoint: Endpoint, message: impl Into<String>) -> Self {
        Self::InvalidResponse { endpoint, message: message.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
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
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Capability(error) => Self::ServiceUnavailable {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::capability::Endpoint;
    use crate::errors::{ApplicationError, CapabilityError, DomainError, InterfaceError};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "confidence must be within [0, 1]".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn bad_request_has_user_safe_message() {
        let interface = ApplicationError::from(DomainError::MalformedRequest(
            "missing field `confidence`".to_owned(),
        ))
        .into_interface("req-2");

        assert!(interface.to_string().contains("missing field `confidence`"));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn capability_error_maps_to_service_unavailable() {
        let interface = ApplicationError::from(CapabilityError::CircuitOpen {
            endpoint: Endpoint::Generate,
        })
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-3");
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("invalid capability url".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn capability_errors_report_their_endpoint() {
        let error = CapabilityError::Timeout { endpoint: Endpoint::OrderLookup, timeout_ms: 10 };
        assert_eq!(error.endpoint(), Endpoint::OrderLookup);
        assert_eq!(error.kind(), "timeout");
        assert_eq!(error.to_string(), "capability `order_lookup` timed out after 10ms");
    }
}
