//! Newline-delimited JSON envelopes
//!
//! Every message is one UTF-8 JSON object followed by exactly one `\n`.
//! serde_json escapes control characters inside strings, so a serialized
//! envelope never contains a raw newline.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Protocol revision announced during `handshake`
pub const PROTOCOL_VERSION: u16 = 1;

/// Error codes observed at the service boundary.
///
/// The service may send codes that are not listed here; those are carried
/// through verbatim.
pub mod codes {
    pub const MAP_FAILED: &str = "E_MAP_FAILED";
    pub const NOT_FOUND: &str = "E_NOT_FOUND";
    pub const NO_PATH: &str = "E_NO_PATH";
    pub const PATH_FAILED: &str = "E_PATH_FAILED";
    pub const ACT_FAILED: &str = "E_ACT_FAILED";
    pub const AUTH_FAILED: &str = "E_AUTH_FAILED";
    pub const CONNECTION: &str = "E_CONNECTION";
    pub const SOCKET_NOT_FOUND: &str = "E_SOCKET_NOT_FOUND";
    pub const PERMISSION_DENIED: &str = "E_PERMISSION_DENIED";
    pub const CONNECTION_REFUSED: &str = "E_CONNECTION_REFUSED";
    pub const CONNECTION_CLOSED: &str = "E_CONNECTION_CLOSED";
    pub const CONNECT_TIMEOUT: &str = "E_CONNECT_TIMEOUT";
    pub const SEND_TIMEOUT: &str = "E_SEND_TIMEOUT";
    pub const RECV_TIMEOUT: &str = "E_RECV_TIMEOUT";
    pub const INVALID_INPUT: &str = "E_INVALID_INPUT";
    pub const PROTOCOL: &str = "E_PROTOCOL";
    pub const SETUP: &str = "E_SETUP";
    pub const START_TIMEOUT: &str = "E_START_TIMEOUT";
}

/// Methods understood by the cartography service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Handshake,
    Status,
    Map,
    Query,
    Pathfind,
    Refresh,
    Act,
    Watch,
    Perceive,
    Auth,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Handshake => "handshake",
            Method::Status => "status",
            Method::Map => "map",
            Method::Query => "query",
            Method::Pathfind => "pathfind",
            Method::Refresh => "refresh",
            Method::Act => "act",
            Method::Watch => "watch",
            Method::Perceive => "perceive",
            Method::Auth => "auth",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request sent to the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Per-call token, used for diagnostics only
    pub id: String,
    pub method: Method,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(method: Method, params: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method,
            params,
        }
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }
}

/// `{code, message}` payload of an error response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The service code, or `default` when the service left it blank
    pub fn code_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.code.is_empty() {
            default
        } else {
            &self.code
        }
    }
}

/// A decoded response line: exactly one of result or error
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Result(Value),
    Error(ServiceError),
}

/// Why a response line could not be decoded
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid JSON in response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response is not a JSON object")]
    NotAnObject,

    #[error("response carries both 'result' and 'error'")]
    BothResultAndError,

    #[error("response carries neither 'result' nor 'error'")]
    NeitherResultNorError,
}

impl Response {
    pub fn result(value: impl Into<Value>) -> Self {
        Response::Result(value.into())
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error(ServiceError::new(code, message))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    /// Decode one frame (without its trailing newline)
    pub fn from_line(line: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(line)?;
        let Value::Object(mut map) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        match (map.remove("result"), map.remove("error")) {
            (Some(result), None) => Ok(Response::Result(result)),
            (None, Some(error)) => serde_json::from_value(error)
                .map(Response::Error)
                .map_err(EnvelopeError::Json),
            (Some(_), Some(_)) => Err(EnvelopeError::BothResultAndError),
            (None, None) => Err(EnvelopeError::NeitherResultNorError),
        }
    }

    /// Serialize as a framed line, echoing `id` the way the service does
    pub fn to_json_line(&self, id: &str) -> Result<String, serde_json::Error> {
        let body = match self {
            Response::Result(result) => serde_json::json!({ "id": id, "result": result }),
            Response::Error(error) => serde_json::json!({ "id": id, "error": error }),
        };
        let mut json = serde_json::to_string(&body)?;
        json.push('\n');
        Ok(json)
    }
}
