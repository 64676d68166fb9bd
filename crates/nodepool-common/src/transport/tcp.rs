use tokio::net::TcpStream;
use tracing::debug;

use crate::protocol::error::{NodepoolError, Result};
use crate::transport::{BoxedStream, ConnectFuture, Transport};

/// Plain TCP transport.
///
/// Resolves `host` (which may be an IP literal or a name) and tries each
/// resulting address until one accepts. `TCP_NODELAY` is set on the stream,
/// since every message is a small line that should go out immediately.
///
/// # Example
///
/// ```no_run
/// use nodepool_common::transport::{TcpTransport, Transport};
///
/// # #[tokio::main]
/// # async fn main() -> nodepool_common::Result<()> {
/// let transport = TcpTransport::new();
/// let stream = transport.connect("127.0.0.1", 2130).await?;
/// # drop(stream);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }

    /// Connects to a remote endpoint.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the name cannot be resolved or every
    /// resolved address refuses the connection.
    pub async fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpStream> {
        let socket_addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| {
                NodepoolError::Transport(format!("Invalid address '{}:{}': {}", host, port, e))
            })?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match TcpStream::connect(socket_addr).await {
                Ok(stream) => {
                    stream
                        .set_nodelay(true)
                        .map_err(|e| map_io_error(e, "setting TCP_NODELAY"))?;
                    debug!(addr = %socket_addr, "tcp stream established");
                    return Ok(stream);
                }
                Err(e) => {
                    last_err = Some(e);
                }
            }
        }

        Err(NodepoolError::Transport(format!(
            "Failed to connect to {}:{}: {}",
            host,
            port,
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string())
        )))
    }
}

impl Transport for TcpTransport {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> ConnectFuture<'a> {
        Box::pin(async move {
            let stream = self.connect_tcp(host, port).await?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

/// Map IO errors to transport-level error variants
///
/// - Reset/aborted/not connected/broken pipe -> `ConnectionClosed`
/// - Unexpected EOF -> `ConnectionClosed`
/// - Other IO errors -> `Io`
pub fn map_io_error(err: std::io::Error, context: &str) -> NodepoolError {
    match err.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::UnexpectedEof => {
            NodepoolError::ConnectionClosed(format!("{}: connection lost", context))
        }
        _ => NodepoolError::Io(err),
    }
}
