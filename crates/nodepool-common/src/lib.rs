//! Nodepool Common Types and Transport
//!
//! This crate provides the protocol definitions, framing codec and transports
//! shared by the nodepool ledger client.
//!
//! # Overview
//!
//! Ledger nodes expose a line-oriented JSON-RPC endpoint over TLS. This crate
//! contains everything needed to talk to one node, independent of how many
//! nodes a client keeps open:
//!
//! - **Protocol Layer**: Request/Response types, request id generation and the error taxonomy
//! - **Transport Layer**: TCP and TLS stream factories plus newline framing
//!
//! # Architecture
//!
//! The wire protocol:
//! - **Transport**: TLS over TCP (plain TCP for tests and trusted links)
//! - **Serialization**: JSON
//! - **Message Format**: one JSON object per line, terminated by `\n`
//! - **Correlation**: a per-connection numeric `id` echoed in the response
//!
//! # Components
//!
//! - [`protocol`] - Core protocol types (Request, Response, Error)
//! - [`transport`] - Transports and the line codec
//!
//! # Example
//!
//! ```
//! use nodepool_common::{Request, Response, RequestIdGenerator};
//! use serde_json::json;
//!
//! let ids = RequestIdGenerator::new();
//! let request = Request::new(ids.next_id(), "Transaction.Get", json!({"txId": "abc"}));
//!
//! let response = Response::success(request.id, json!({"status": "confirmed"}));
//! assert!(response.is_success());
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
