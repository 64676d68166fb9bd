//! Response Types
//!
//! This module defines the inbound response record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{NodepoolError, Result};
use super::RequestId;

/// Result payload returned by a node (any JSON value)
pub type RpcResult = Value;

/// A response read from a node.
///
/// Exactly one of `result` / `error` is meaningful. Nodes running the
/// standard JSON-RPC codec send both keys with the unused one set to `null`,
/// and a `null` error is treated as success.
///
/// # Example
///
/// ```
/// use nodepool_common::protocol::responses::Response;
/// use serde_json::json;
///
/// let ok = Response::success(7, json!({"txid": "abc"}));
/// assert_eq!(ok.into_result().unwrap(), json!({"txid": "abc"}));
///
/// let failed = Response::error(7, json!("unknown asset"));
/// assert!(failed.into_result().is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Request identifier this response corresponds to
    pub id: RequestId,
    /// Result value (present on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RpcResult>,
    /// Error payload (present on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Response {
    /// Creates a successful response.
    pub fn success(id: RequestId, result: RpcResult) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    pub fn error(id: RequestId, error: Value) -> Self {
        Response {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.as_ref().map_or(true, Value::is_null)
    }

    /// Converts the response into the caller-facing outcome.
    ///
    /// A success without a `result` key yields `Value::Null`.
    pub fn into_result(self) -> Result<RpcResult> {
        match self.error {
            Some(error) if !error.is_null() => Err(NodepoolError::Remote(error)),
            _ => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
