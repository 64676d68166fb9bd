use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use nodepool_common::transport::tcp::map_io_error;
use nodepool_common::transport::{BoxedStream, JsonLineCodec, LineAccumulator, Transport};
use nodepool_common::{NodepoolError, Request, RequestId, RequestIdGenerator, Result};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ConnectionOptions;
use crate::registry::node_id;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Lifecycle of a [`Connection`].
///
/// `Connecting -> {Connected, Failed}`, `Connected -> {Ended, Failed}`.
/// `Ended` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Closed by us (explicit close or idle timeout)
    Ended,
    /// Lost because of the peer or the transport
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Ended | ConnectionState::Failed)
    }
}

/// Terminal transition of an established connection, delivered to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub node_id: String,
    pub state: ConnectionState,
}

pub type EventSender = mpsc::UnboundedSender<ConnectionEvent>;

type PendingTable = HashMap<RequestId, oneshot::Sender<Result<Value>>>;

/// State shared between the connection handle and its reader task.
struct Shared {
    node_id: String,
    state: watch::Sender<ConnectionState>,
    pending: Mutex<PendingTable>,
    events: Option<EventSender>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_pending(&self, id: RequestId) -> Option<oneshot::Sender<Result<Value>>> {
        self.pending().remove(&id)
    }

    /// Moves to a terminal state and fails every outstanding request.
    ///
    /// Only the first call has any effect. Returns whether this call made the
    /// transition.
    fn finish(&self, state: ConnectionState, reason: &str) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = state;
            true
        });
        if !changed {
            return false;
        }

        let drained: Vec<_> = self.pending().drain().collect();
        debug!(
            node = %self.node_id,
            ?state,
            reason,
            failed_requests = drained.len(),
            "connection closed"
        );
        for (_, tx) in drained {
            let _ = tx.send(Err(NodepoolError::ConnectionClosed(format!(
                "{}: {}",
                self.node_id, reason
            ))));
        }

        if let Some(events) = &self.events {
            let _ = events.send(ConnectionEvent {
                node_id: self.node_id.clone(),
                state,
            });
        }
        true
    }

    /// Routes one inbound segment to its pending request.
    ///
    /// Returns `false` if the segment could not be parsed.
    fn dispatch(&self, segment: &[u8]) -> bool {
        let response = match JsonLineCodec::decode_response(segment) {
            Ok(response) => response,
            Err(e) => {
                warn!(node = %self.node_id, error = %e, "skipping malformed message");
                return false;
            }
        };

        match self.take_pending(response.id) {
            Some(tx) => {
                let _ = tx.send(response.into_result());
            }
            None => {
                debug!(node = %self.node_id, id = response.id, "discarding response with no pending request");
            }
        }
        true
    }
}

struct ConnectionInner {
    host: String,
    port: u16,
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<WriteHalf<BoxedStream>>,
    ids: RequestIdGenerator,
    reader: JoinHandle<()>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.shared.finish(ConnectionState::Ended, "dropped");
        self.reader.abort();
    }
}

/// One framed request/response channel to a node.
///
/// Cloning is cheap; every clone refers to the same underlying stream.
/// Responses are matched to requests by id, so calls may be issued
/// concurrently and answered out of order.
///
/// # Example
///
/// ```rust,no_run
/// use nodepool_client::connection::Connection;
/// use nodepool_client::ConnectionOptions;
/// use nodepool_common::transport::TcpTransport;
/// use serde_json::json;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> nodepool_common::Result<()> {
/// let transport = TcpTransport::new();
/// let conn = Connection::open("127.0.0.1", 2130, &transport, &ConnectionOptions::default(), None).await?;
///
/// let peers = conn
///     .call("Node.List", json!({"Start": null, "Count": 100}), Duration::from_secs(5))
///     .await?;
/// conn.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Establishes a connection to `host:port`.
    ///
    /// The stream must be fully established (including any TLS handshake)
    /// within `options.handshake_timeout`. Once connected, the connection is
    /// torn down after `options.idle_timeout` without a valid inbound message.
    /// Terminal transitions are reported on `events` if given.
    ///
    /// # Errors
    ///
    /// - `HandshakeTimeout` if the stream is not ready in time
    /// - the transport's error if connecting fails
    pub async fn open(
        host: &str,
        port: u16,
        transport: &dyn Transport,
        options: &ConnectionOptions,
        events: Option<EventSender>,
    ) -> Result<Self> {
        let id = node_id(host, port);
        let (state, _) = watch::channel(ConnectionState::Connecting);
        debug!(node = %id, "connecting");

        let stream = match tokio::time::timeout(
            options.handshake_timeout,
            transport.connect(host, port),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                state.send_replace(ConnectionState::Failed);
                debug!(node = %id, error = %e, "connect failed");
                return Err(e);
            }
            Err(_) => {
                state.send_replace(ConnectionState::Failed);
                debug!(node = %id, "handshake timed out");
                return Err(NodepoolError::HandshakeTimeout(
                    options.handshake_timeout.as_millis() as u64,
                ));
            }
        };

        state.send_replace(ConnectionState::Connected);
        let (read_half, write_half) = tokio::io::split(stream);
        let shared = Arc::new(Shared {
            node_id: id.clone(),
            state,
            pending: Mutex::new(HashMap::new()),
            events,
        });
        let reader = tokio::spawn(read_loop(
            Arc::clone(&shared),
            read_half,
            options.idle_timeout,
            LineAccumulator::with_max_line_len(options.max_line_len),
        ));

        debug!(node = %id, "connected");
        Ok(Self {
            inner: Arc::new(ConnectionInner {
                host: host.to_string(),
                port,
                shared,
                writer: tokio::sync::Mutex::new(write_half),
                ids: RequestIdGenerator::new(),
                reader,
            }),
        })
    }

    /// Record id (`host:port`) of the node this connection reaches
    pub fn id(&self) -> &str {
        &self.inner.shared.node_id
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch receiver for state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.state.subscribe()
    }

    /// Waits until the connection reaches a terminal state.
    pub async fn closed(&self) -> ConnectionState {
        let mut rx = self.subscribe();
        let result = rx.wait_for(|state| state.is_terminal()).await.map(|state| *state);
        // The sender lives as long as `self`, so waiting cannot fail
        result.unwrap_or(ConnectionState::Ended)
    }

    /// Number of requests awaiting a response
    pub fn pending_count(&self) -> usize {
        self.inner.shared.pending().len()
    }

    /// Sends `method(params)` and waits for the matching response.
    ///
    /// The whole exchange (write included) is bounded by `timeout`. Exactly
    /// one outcome is returned per call; a response arriving after the
    /// deadline is discarded.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` immediately if the connection is not connected,
    ///   or when it closes while the call is outstanding
    /// - `CallTimeout` when the deadline passes
    /// - `Remote` when the node answers with an error payload
    pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let shared = &self.inner.shared;
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(NodepoolError::ConnectionClosed(format!(
                "{} is {:?}",
                shared.node_id, state
            )));
        }

        let id = self.inner.ids.next_id();
        let line = JsonLineCodec::encode_request(&Request::new(id, method, params))?;
        let (tx, rx) = oneshot::channel();
        shared.pending().insert(id, tx);

        // A terminal transition may have drained the table before the insert
        if self.state().is_terminal() {
            shared.take_pending(id);
            return Err(NodepoolError::ConnectionClosed(shared.node_id.clone()));
        }

        let exchange = async {
            self.write_line(&line).await?;
            rx.await.map_err(|_| {
                NodepoolError::ConnectionClosed(format!("{}: request dropped", shared.node_id))
            })?
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => {
                if result.is_err() {
                    shared.take_pending(id);
                }
                result
            }
            Err(_) => {
                shared.take_pending(id);
                debug!(node = %shared.node_id, method, id, "call timed out");
                Err(NodepoolError::CallTimeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn write_line(&self, line: &[u8]) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        let written = match writer.write_all(line).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| {
            let err = map_io_error(e, "writing request");
            self.inner.shared.finish(ConnectionState::Failed, &err.to_string());
            err
        })
    }

    /// Closes the connection. Idempotent.
    ///
    /// Outstanding calls fail with `ConnectionClosed`.
    pub async fn close(&self) {
        if !self.inner.shared.finish(ConnectionState::Ended, "closed by caller") {
            return;
        }
        self.inner.reader.abort();
        let mut writer = self.inner.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("node", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Reads until the stream ends, the idle deadline passes or the task is
/// aborted.
async fn read_loop(
    shared: Arc<Shared>,
    mut reader: ReadHalf<BoxedStream>,
    idle_timeout: Duration,
    mut accumulator: LineAccumulator,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            _ = &mut idle => {
                shared.finish(ConnectionState::Ended, "idle timeout");
                return;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    shared.finish(ConnectionState::Failed, "closed by peer");
                    return;
                }
                Ok(n) => {
                    let segments = match accumulator.push(&buf[..n]) {
                        Ok(segments) => segments,
                        Err(e) => {
                            warn!(node = %shared.node_id, error = %e, "dropping connection");
                            shared.finish(ConnectionState::Failed, &e.to_string());
                            return;
                        }
                    };
                    let mut valid = false;
                    for segment in segments {
                        valid |= shared.dispatch(&segment);
                    }
                    if valid {
                        idle.as_mut().reset(Instant::now() + idle_timeout);
                    }
                }
                Err(e) => {
                    shared.finish(ConnectionState::Failed, &e.to_string());
                    return;
                }
            }
        }
    }
}
