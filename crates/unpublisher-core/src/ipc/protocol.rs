//! Wire types for the admin socket
//!
//! One JSON object per line in each direction. Requests carry the caller's
//! bearer token; responses carry either `result` or `error`, never both.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::policy::{ConfigureRequest, ContentId, Policy};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Bearer token of the calling administrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            params: serde_json::Value::Null,
            token: None,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn ok(id: Uuid, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn fail(id: Uuid, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Failure carrying the code that matches the error kind
    pub fn from_error(id: Uuid, error: &Error) -> Self {
        Self::fail(id, RpcError::from(error))
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Unwrap the envelope on the client side
    pub fn into_result(self) -> Result<serde_json::Value> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error.into()),
            (None, Some(value)) => Ok(value),
            (None, None) => Err(Error::Other("Empty response".to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&Error> for RpcError {
    fn from(error: &Error) -> Self {
        let code = match error {
            Error::Unauthorized(_) => codes::UNAUTHORIZED,
            Error::Configuration(_) => codes::CONFIGURATION,
            Error::PolicyNotFound(_) => codes::NOT_FOUND,
            _ => codes::INTERNAL,
        };
        Self::new(code, error.to_string())
    }
}

impl From<RpcError> for Error {
    fn from(error: RpcError) -> Self {
        match error.code {
            codes::UNAUTHORIZED => Error::Unauthorized(error.message),
            codes::CONFIGURATION => Error::Configuration(error.message),
            codes::NOT_FOUND => Error::PolicyNotFound(error.message),
            code => Error::Other(format!("RPC error {}: {}", code, error.message)),
        }
    }
}

/// JSON-RPC 2.0 codes, plus the -3200x range for admin failures
pub mod codes {
    pub const PARSE: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL: i32 = -32603;

    pub const UNAUTHORIZED: i32 = -32001;
    pub const CONFIGURATION: i32 = -32002;
    pub const NOT_FOUND: i32 = -32003;
}

pub mod methods {
    pub const PING: &str = "ping";
    pub const STATUS: &str = "status";

    pub const POLICY_LIST: &str = "policy.list";
    pub const POLICY_STATUS: &str = "policy.status";
    pub const POLICY_CONFIGURE: &str = "policy.configure";
    pub const POLICY_CLEAR_LOG: &str = "policy.clear_log";
    pub const POLICY_UPDATE_EXCLUSIONS: &str = "policy.update_exclusions";
    pub const POLICY_RUN: &str = "policy.run";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyIdParams {
    pub policy_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureParams {
    pub policy_id: String,
    #[serde(flatten)]
    pub request: ConfigureRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionParams {
    pub policy_id: String,
    pub exclusions: BTreeSet<ContentId>,
}

/// Daemon summary returned by `status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub uptime_secs: u64,
    pub policies: usize,
    pub enabled_policies: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyListResponse {
    pub policies: Vec<Policy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyResponse {
    pub policy: Policy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearLogResponse {
    pub cleared: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_optional_on_the_wire() {
        let anonymous = serde_json::to_string(&Request::new(methods::PING)).unwrap();
        assert!(anonymous.contains("\"method\":\"ping\""));
        assert!(!anonymous.contains("token"));

        let signed = Request::new(methods::POLICY_LIST).with_token(Some("abc".into()));
        let parsed: Request = serde_json::from_str(&serde_json::to_string(&signed).unwrap()).unwrap();
        assert_eq!(parsed.token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_error_kinds_survive_the_wire() {
        let id = Uuid::new_v4();
        let resp = Response::from_error(id, &Error::Unauthorized("unknown token".into()));
        assert!(!resp.is_ok());
        assert_eq!(resp.error.as_ref().unwrap().code, codes::UNAUTHORIZED);
        assert!(matches!(resp.into_result(), Err(Error::Unauthorized(_))));

        let resp = Response::from_error(id, &Error::PolicyNotFound("x".into()));
        assert!(matches!(resp.into_result(), Err(Error::PolicyNotFound(_))));

        let resp = Response::from_error(id, &Error::QueueCommit("x".into()));
        assert_eq!(resp.error.unwrap().code, codes::INTERNAL);

        let empty = Response {
            id,
            result: None,
            error: None,
        };
        assert!(empty.into_result().is_err());
    }

    #[test]
    fn test_configure_params_are_flat() {
        let params: ConfigureParams = serde_json::from_value(serde_json::json!({
            "policy_id": "five-years",
            "enabled": true,
            "since_date": "2025-01-01"
        }))
        .unwrap();
        assert_eq!(params.policy_id, "five-years");
        assert!(params.request.enabled);
        assert_eq!(params.request.recurrence, None);
    }
}
