//! Error types for the cartograph client

use std::fmt;

use cartograph_protocol::{codes, EnvelopeError, ServiceError};
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure category, for branching without matching on every variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Timeout,
    NotFound,
    Map,
    Path,
    Action,
    Auth,
    Setup,
    InvalidInput,
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not found",
            ErrorKind::Map => "map",
            ErrorKind::Path => "pathfind",
            ErrorKind::Action => "action",
            ErrorKind::Auth => "auth",
            ErrorKind::Setup => "setup",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::Protocol => "protocol",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the cartograph client
///
/// Every variant carries a stable machine code (e.g. `E_SOCKET_NOT_FOUND`)
/// and a human-readable message. Service-reported failures keep the
/// service's code verbatim, including codes this crate does not know.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The channel is unreachable, refused, not permitted, or broke mid-call
    #[error("[{code}] {message}")]
    Connection { code: String, message: String },

    /// Connect, send or receive exceeded the endpoint timeout
    #[error("[{code}] {message}")]
    Timeout { code: String, message: String },

    /// A lookup found nothing or referenced an invalid handle
    #[error("[{code}] {message}")]
    NotFound { code: String, message: String },

    #[error("[{code}] {message}")]
    Map { code: String, message: String },

    #[error("[{code}] {message}")]
    Path { code: String, message: String },

    /// Act, refresh and watch failures
    #[error("[{code}] {message}")]
    Action { code: String, message: String },

    #[error("[{code}] {message}")]
    Auth { code: String, message: String },

    /// The service is not reachable or not usable from this environment
    #[error("[{code}] {message}")]
    Setup { code: String, message: String },

    /// Rejected before anything was sent
    #[error("[E_INVALID_INPUT] {0}")]
    InvalidInput(String),

    /// The service sent something that is not a valid response
    #[error("[E_PROTOCOL] {0}")]
    Protocol(String),
}

impl Error {
    /// Wrap a service-reported `{code, message}` pair as an error of `kind`
    ///
    /// `default_code` is used when the service left the code blank.
    pub fn from_service(kind: ErrorKind, err: ServiceError, default_code: &str) -> Self {
        let code = err.code_or(default_code).to_string();
        let message = if err.message.is_empty() {
            format!("{kind} failed")
        } else {
            err.message
        };
        Self::with_kind(kind, code, message)
    }

    fn with_kind(kind: ErrorKind, code: String, message: String) -> Self {
        match kind {
            ErrorKind::Connection => Error::Connection { code, message },
            ErrorKind::Timeout => Error::Timeout { code, message },
            ErrorKind::NotFound => Error::NotFound { code, message },
            ErrorKind::Map => Error::Map { code, message },
            ErrorKind::Path => Error::Path { code, message },
            ErrorKind::Action => Error::Action { code, message },
            ErrorKind::Auth => Error::Auth { code, message },
            ErrorKind::Setup => Error::Setup { code, message },
            ErrorKind::InvalidInput => Error::InvalidInput(message),
            ErrorKind::Protocol => Error::Protocol(message),
        }
    }

    pub fn connection(code: &str, message: impl Into<String>) -> Self {
        Error::Connection {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(code: &str, message: impl Into<String>) -> Self {
        Error::Timeout {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn setup(code: &str, message: impl Into<String>) -> Self {
        Error::Setup {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection { .. } => ErrorKind::Connection,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Map { .. } => ErrorKind::Map,
            Error::Path { .. } => ErrorKind::Path,
            Error::Action { .. } => ErrorKind::Action,
            Error::Auth { .. } => ErrorKind::Auth,
            Error::Setup { .. } => ErrorKind::Setup,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Machine-readable code
    pub fn code(&self) -> &str {
        match self {
            Error::Connection { code, .. }
            | Error::Timeout { code, .. }
            | Error::NotFound { code, .. }
            | Error::Map { code, .. }
            | Error::Path { code, .. }
            | Error::Action { code, .. }
            | Error::Auth { code, .. }
            | Error::Setup { code, .. } => code,
            Error::InvalidInput(_) => codes::INVALID_INPUT,
            Error::Protocol(_) => codes::PROTOCOL,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::Connection { message, .. }
            | Error::Timeout { message, .. }
            | Error::NotFound { message, .. }
            | Error::Map { message, .. }
            | Error::Path { message, .. }
            | Error::Action { message, .. }
            | Error::Auth { message, .. }
            | Error::Setup { message, .. } => message,
            Error::InvalidInput(message) | Error::Protocol(message) => message,
        }
    }

    /// True for failures raised before anything reached the channel
    pub fn is_client_side(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}

impl From<EnvelopeError> for Error {
    fn from(err: EnvelopeError) -> Self {
        Error::Protocol(err.to_string())
    }
}
