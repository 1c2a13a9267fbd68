// Error taxonomy for the RPC substrate.
//
// Handlers never see transport or crypto failures directly; the security
// wrapper and RPC client convert everything into this taxonomy before it
// reaches application logic. Remote failures travel as `ErrorInfo` and are
// reconstructed through the explicit allow-list below; anything unrecognized
// becomes a generic `Remote` value.

use thiserror::Error;
use uuid::Uuid;

use crate::messages::ErrorInfo;

/// Wire class names for failures that cross process boundaries.
pub mod classes {
    pub const TIMEOUT: &str = "TimeoutError";
    pub const SESSION_NOT_FOUND: &str = "SessionNotFoundError";
    pub const SERVICE_NOT_FOUND: &str = "ServiceNotFoundError";
    pub const PROTOCOL_VIOLATION: &str = "ProtocolViolationError";
    pub const HOST_UNREACHABLE: &str = "HostUnreachableError";
    pub const HANDLER: &str = "ServiceExecutionError";

    /// Classes an intermediate relay may legitimately resign under its own
    /// outer identity.
    pub const RELAY_ALLOWED: [&str; 2] = [SESSION_NOT_FOUND, HOST_UNREACHABLE];
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Distinguished, always-retriable failure: the peer referenced a session
    /// id this side has evicted or never saw.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("no service registered for request kind '{0}'")]
    ServiceNotFound(String),

    #[error("remote failure: {0}")]
    Remote(ErrorInfo),

    #[error("duplicate or unknown response for request {0}")]
    DuplicateResponse(Uuid),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}

impl RpcError {
    /// Whether the failure is explicitly tagged safe to retry, independent of
    /// the request's own idempotence flag.
    pub fn is_retriable(&self) -> bool {
        matches!(self, RpcError::SessionNotFound(_))
    }

    /// Convert to the wire error description.
    pub fn to_error_info(&self) -> ErrorInfo {
        let class = match self {
            RpcError::Timeout(_) => classes::TIMEOUT,
            RpcError::SessionNotFound(_) => classes::SESSION_NOT_FOUND,
            RpcError::ServiceNotFound(_) => classes::SERVICE_NOT_FOUND,
            RpcError::Protocol(_) | RpcError::DuplicateResponse(_) => classes::PROTOCOL_VIOLATION,
            RpcError::Transport(_) => classes::HOST_UNREACHABLE,
            RpcError::Remote(info) => return info.clone(),
            _ => classes::HANDLER,
        };
        ErrorInfo::new(class, self.to_string())
    }
}

impl ErrorInfo {
    /// Reconstruct a local error value from a remote description.
    ///
    /// Only the classes in the allow-list map back to concrete kinds; an
    /// unrecognized class becomes a generic remote failure wrapping the
    /// description, never a dynamically-loaded type.
    pub fn reconstruct(&self) -> RpcError {
        match self.class_name.as_str() {
            classes::TIMEOUT => RpcError::Timeout(self.message.clone()),
            classes::SESSION_NOT_FOUND => RpcError::SessionNotFound(self.message.clone()),
            classes::SERVICE_NOT_FOUND => RpcError::ServiceNotFound(self.message.clone()),
            classes::PROTOCOL_VIOLATION => RpcError::Protocol(self.message.clone()),
            classes::HOST_UNREACHABLE => RpcError::Transport(self.message.clone()),
            _ => RpcError::Remote(self.clone()),
        }
    }

    /// Whether a relay is allowed to resign this error under its own outer
    /// identity (see the security wrapper's coordinate cross-check).
    pub fn is_relay_allowed(&self) -> bool {
        classes::RELAY_ALLOWED.contains(&self.class_name.as_str())
    }
}

impl From<hausnet_keys::KeyError> for RpcError {
    fn from(err: hausnet_keys::KeyError) -> Self {
        RpcError::Crypto(err.to_string())
    }
}

impl From<bincode::Error> for RpcError {
    fn from(err: bincode::Error) -> Self {
        RpcError::Serialization(err.to_string())
    }
}

/// Result type for RPC substrate operations
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_is_always_retriable() {
        assert!(RpcError::SessionNotFound("gone".into()).is_retriable());
        assert!(!RpcError::Transport("refused".into()).is_retriable());
        assert!(!RpcError::Timeout("late".into()).is_retriable());
    }

    #[test]
    fn reconstruction_uses_the_allow_list() {
        let info = ErrorInfo::new(classes::SESSION_NOT_FOUND, "purged");
        assert!(matches!(info.reconstruct(), RpcError::SessionNotFound(_)));

        let info = ErrorInfo::new("com.example.SomeUnknownError", "boom");
        match info.reconstruct() {
            RpcError::Remote(inner) => assert_eq!(inner, info),
            other => panic!("unexpected reconstruction: {other:?}"),
        }
    }

    #[test]
    fn relay_allowance_covers_misrouted_session_errors() {
        assert!(ErrorInfo::new(classes::SESSION_NOT_FOUND, "x").is_relay_allowed());
        assert!(ErrorInfo::new(classes::HOST_UNREACHABLE, "x").is_relay_allowed());
        assert!(!ErrorInfo::new(classes::TIMEOUT, "x").is_relay_allowed());
    }
}
