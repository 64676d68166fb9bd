use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

pub type RequestId = u64;
pub type MethodName = String;
pub type RpcParams = Value;

/// Outbound call record, one per line on the wire.
///
/// Nodes decode `params` as a positional argument list, so the single
/// parameter object is wrapped in a one-element array (or sent as `[]` when
/// there is nothing to pass).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: MethodName,
    pub params: Vec<RpcParams>,
}

impl Request {
    pub fn new(id: RequestId, method: impl Into<String>, params: RpcParams) -> Self {
        let params = if params.is_null() { Vec::new() } else { vec![params] };
        Request {
            id,
            method: method.into(),
            params,
        }
    }
}

/// Per-connection request id source.
///
/// Ids only have to be unique among one connection's outstanding requests,
/// so a monotonic counter is enough.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> RequestId {
        // Start at 1 so a zero id never goes on the wire
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}
