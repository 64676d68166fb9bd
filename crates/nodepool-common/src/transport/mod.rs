//! Transport Layer
//!
//! This module provides the byte-stream factories the client connects through
//! and the line codec that frames RPC messages on those streams.
//!
//! # Architecture
//!
//! - **Transport**: anything that can hand back an ordered, reliable stream
//!   for a `(host, port)` pair. Plain TCP and TLS over TCP are provided.
//! - **Codec**: one JSON object per line, `\n` terminated.
//!
//! # Components
//!
//! - **[`Transport`]**: the connect-side collaborator trait
//! - **[`TcpTransport`]**: plain TCP streams
//! - **[`TlsTransport`]**: TLS streams with strict or permissive certificate checks
//! - **[`JsonLineCodec`]** / **[`LineAccumulator`]**: message framing
//!
//! # Example
//!
//! ```no_run
//! use nodepool_common::transport::{TcpTransport, Transport};
//!
//! # #[tokio::main]
//! # async fn main() -> nodepool_common::Result<()> {
//! let transport = TcpTransport::new();
//! let stream = transport.connect("127.0.0.1", 2130).await?;
//! # drop(stream);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol::error::Result;

pub mod codec;
pub mod tcp;
pub mod tls;

pub use codec::{JsonLineCodec, LineAccumulator, DELIMITER, MAX_LINE_LEN};
pub use tcp::TcpTransport;
pub use tls::{TlsOptions, TlsTransport};

/// A bidirectional byte stream a connection can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Type-erased stream returned by every [`Transport`]
pub type BoxedStream = Box<dyn AsyncStream>;

/// Future returned by [`Transport::connect`]
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<BoxedStream>> + Send + 'a>>;

/// Factory for secured, ordered byte streams to a node.
///
/// The future resolves once the stream is fully established (for TLS, after
/// the handshake). Callers bound it with their own handshake timeout.
pub trait Transport: Send + Sync {
    /// Opens a stream to `host:port`.
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> ConnectFuture<'a>;
}
