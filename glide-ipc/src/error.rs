//! Error types for the client engine.
//!
//! Failures fall into three scopes:
//! - [`ClientError::Closing`]: the connection is gone; every pending call fails.
//! - [`ClientError::Configuration`]: the caller used the pub/sub API in a way
//!   the current subscription setup does not allow.
//! - [`ClientError::Request`]: one call failed; the connection stays usable.

use glide_ipc_core::proto::RequestErrorType;
use serde::{Deserialize, Serialize};

/// Message used for every call rejected after the client closed.
pub const CLOSED_CLIENT_MESSAGE: &str =
    "Unable to execute requests; the client is closed. Please create a new client.";

/// Message used when the stream reaches EOF while the client is open.
pub const UNEXPECTED_EOF_MESSAGE: &str = "The communication layer was unexpectedly closed.";

/// Message used when a push frame has no payload to decode.
pub const MALFORMED_PUSH_MESSAGE: &str = "Client Error - push notification without resp_pointer";

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Kind of a per-request failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestErrorKind {
    /// Any failure without a more specific kind.
    Unspecified,
    /// The core lost its connection to the server while running the request.
    Disconnect,
    /// A transaction was aborted.
    ExecAbort,
    /// The core gave up waiting for the server.
    Timeout,
}

impl RequestErrorKind {
    /// Classify the raw error type carried by a response frame.
    ///
    /// Unknown values map to [`RequestErrorKind::Unspecified`].
    pub fn from_wire(raw: i32) -> Self {
        match RequestErrorType::try_from(raw) {
            Ok(RequestErrorType::Disconnect) => RequestErrorKind::Disconnect,
            Ok(RequestErrorType::ExecAbort) => RequestErrorKind::ExecAbort,
            Ok(RequestErrorType::Timeout) => RequestErrorKind::Timeout,
            Ok(RequestErrorType::Unspecified) | Err(_) => RequestErrorKind::Unspecified,
        }
    }
}

impl std::fmt::Display for RequestErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestErrorKind::Unspecified => write!(f, "request error"),
            RequestErrorKind::Disconnect => write!(f, "connection error"),
            RequestErrorKind::ExecAbort => write!(f, "exec abort"),
            RequestErrorKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Errors surfaced to callers of the client.
///
/// `Clone` so one shutdown cause can be delivered to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The connection was torn down, or never came up.
    #[error("closing: {0}")]
    Closing(String),

    /// Pub/sub API used inconsistently with the subscription setup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single request failed.
    #[error("{kind}: {message}")]
    Request {
        /// Failure classification.
        kind: RequestErrorKind,
        /// Message reported by the core.
        message: String,
    },
}

impl ClientError {
    /// Shorthand for the error returned once the client is closed.
    pub fn closed() -> Self {
        ClientError::Closing(CLOSED_CLIENT_MESSAGE.to_string())
    }

    /// Build a request error from the raw wire type and message.
    pub fn request(raw_type: i32, message: impl Into<String>) -> Self {
        ClientError::Request {
            kind: RequestErrorKind::from_wire(raw_type),
            message: message.into(),
        }
    }

    /// Whether this error means the connection is gone.
    pub fn is_closing(&self) -> bool {
        matches!(self, ClientError::Closing(_))
    }

    /// Request error kind, if this is a per-request failure.
    pub fn request_kind(&self) -> Option<RequestErrorKind> {
        match self {
            ClientError::Request { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
