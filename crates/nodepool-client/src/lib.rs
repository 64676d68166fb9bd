//! Nodepool Client
//!
//! A client-side pool of connections to ledger nodes. The pool discovers
//! nodes on its own, keeps enough of them connected, and offers two call
//! shapes on top:
//!
//! - **Quorum broadcast** for writes: every open connection is called and a
//!   minimum number of successes is required
//! - **Fallback read** for reads: nodes are tried one at a time until one
//!   answers
//!
//! # Components
//!
//! - [`connection`] - One framed request/response channel to a node
//! - [`registry`] - Known nodes and their health
//! - [`discovery`] - Hint records and peer exchange
//! - [`pool`] - The scheduler that ties it together
//! - [`calls`] - Broadcast, batch broadcast and read
//! - [`aggregate`] - Majority selection over node replies
//! - [`records`] - The record trait and ledger method helpers

pub mod aggregate;
pub mod calls;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod network;
pub mod pool;
pub mod records;
pub mod registry;

pub use aggregate::{majority, majority_field};
pub use calls::{BatchOutcome, BroadcastOutcome};
pub use config::{ConnectionOptions, DiscoveryConfig, PoolConfig, RenewalConfig};
pub use connection::{Connection, ConnectionEvent, ConnectionState};
pub use discovery::{DiscoveryOutcome, HintResolver, PeerHint, StaticHintResolver};
pub use network::Network;
pub use pool::{Pool, PoolStatus};
pub use records::{methods, PaymentSummary, RpcRecord, Submission};
pub use registry::{NodeRecord, Registry};
