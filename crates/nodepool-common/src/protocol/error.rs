use std::fmt;

use thiserror::Error;

/// A failure attributed to one node, kept for diagnostics when a pool-wide
/// operation reports its outcome.
#[derive(Debug)]
pub struct NodeFailure {
    /// Id (`host:port`) of the node that failed
    pub node_id: String,
    /// What went wrong on that node
    pub error: NodepoolError,
}

impl NodeFailure {
    pub fn new(node_id: impl Into<String>, error: NodepoolError) -> Self {
        Self {
            node_id: node_id.into(),
            error,
        }
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.node_id, self.error)
    }
}

#[derive(Error, Debug)]
pub enum NodepoolError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Handshake timeout after {0}ms")]
    HandshakeTimeout(u64),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Call timeout after {0}ms")]
    CallTimeout(u64),

    #[error("Remote error: {0}")]
    Remote(serde_json::Value),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("Not enough responses: got {received}, need {required}")]
    NotEnoughResponses {
        required: usize,
        received: usize,
        errors: Vec<NodeFailure>,
    },

    #[error("No nodes available")]
    NoNodes,

    #[error("Discovery exhausted before the pool was ready")]
    DiscoveryExhausted,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodepoolError {
    /// Whether the error means the underlying connection can no longer be used.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            NodepoolError::ConnectionClosed(_) | NodepoolError::Transport(_) | NodepoolError::Io(_)
        )
    }
}

impl From<std::num::ParseIntError> for NodepoolError {
    fn from(err: std::num::ParseIntError) -> Self {
        NodepoolError::InvalidAddress(err.to_string())
    }
}

impl From<rustls::Error> for NodepoolError {
    fn from(err: rustls::Error) -> Self {
        NodepoolError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NodepoolError>;
