//! Mock ledger nodes for integration tests.
//!
//! Each node listens on loopback, speaks the newline-delimited JSON protocol
//! over plain TCP and answers through a caller-supplied handler.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nodepool_client::{
    Network, NodeRecord, Pool, PoolConfig, RenewalConfig, StaticHintResolver,
};
use nodepool_common::transport::{JsonLineCodec, TcpTransport};
use nodepool_common::{Request, Response};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// What a mock node does with one request
pub enum Reply {
    Result(Value),
    Error(Value),
    /// Never answer
    Silent,
    /// Close the connection without answering
    Close,
}

pub type Handler = Arc<dyn Fn(&Request) -> Reply + Send + Sync>;

/// Mock node that runs on a separate task
pub struct MockNode {
    pub port: u16,
    accepted: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockNode {
    /// Starts a node on a random port
    pub async fn start(handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, handler)
    }

    /// Starts a node on an already bound listener
    pub fn serve(listener: TcpListener, handler: Handler) -> Self {
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        {
            let accepted = Arc::clone(&accepted);
            let requests = Arc::clone(&requests);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        result = listener.accept() => {
                            let Ok((socket, _)) = result else { continue };
                            accepted.fetch_add(1, Ordering::SeqCst);
                            let handler = Arc::clone(&handler);
                            let requests = Arc::clone(&requests);
                            tokio::spawn(async move {
                                let (read, mut write) = socket.into_split();
                                let mut lines = BufReader::new(read).lines();
                                while let Ok(Some(line)) = lines.next_line().await {
                                    let Ok(request) = JsonLineCodec::decode_request(line.as_bytes()) else {
                                        continue;
                                    };
                                    requests.fetch_add(1, Ordering::SeqCst);
                                    let response = match handler(&request) {
                                        Reply::Result(value) => Response::success(request.id, value),
                                        Reply::Error(error) => Response::error(request.id, error),
                                        Reply::Silent => continue,
                                        Reply::Close => return,
                                    };
                                    let out = JsonLineCodec::encode_response(&response).unwrap();
                                    if write.write_all(&out).await.is_err() {
                                        return;
                                    }
                                }
                            });
                        }
                        _ = &mut shutdown_rx => {
                            break;
                        }
                    }
                }
            });
        }

        Self {
            port,
            accepted,
            requests,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Echoes `params[0]`
    pub async fn echo() -> Self {
        Self::start(Arc::new(|request| Reply::Result(first_param(request)))).await
    }

    /// Answers every request with a remote error
    pub async fn failing() -> Self {
        Self::start(Arc::new(|_| Reply::Error(json!("internal error")))).await
    }

    /// Accepts connections but never answers
    pub async fn silent() -> Self {
        Self::start(Arc::new(|_| Reply::Silent)).await
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn id(&self) -> String {
        self.addr()
    }

    pub fn record(&self) -> NodeRecord {
        NodeRecord::new("127.0.0.1", self.port)
    }

    /// Connections accepted so far
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Requests received so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub fn first_param(request: &Request) -> Value {
    request.params.first().cloned().unwrap_or(Value::Null)
}

/// Handler answering `Node.List` with `peers` and echoing everything else
pub fn peer_handler(peers: Vec<String>) -> Handler {
    Arc::new(move |request| {
        if request.method == "Node.List" {
            Reply::Result(json!({ "addresses": peers }))
        } else {
            Reply::Result(first_param(request))
        }
    })
}

/// Config for loopback tests: short timeouts, no scheduled passes during
/// the test, discovery effectively off unless overridden.
pub fn test_config(minimum: usize, enough: usize) -> PoolConfig {
    let mut config = PoolConfig {
        minimum,
        enough,
        handshake_timeout: Duration::from_millis(500),
        call_timeout: Duration::from_millis(300),
        renewal: RenewalConfig {
            too_few: Duration::from_secs(60),
            few: Duration::from_secs(60),
            enough: Duration::from_secs(60),
        },
        ..PoolConfig::default()
    };
    config.discovery.enough_alive_nodes = 0;
    config.discovery.enough_records = 0;
    config
}

/// Pool over plain TCP with no hint records
pub fn tcp_pool(seeds: Vec<NodeRecord>, config: PoolConfig) -> Pool {
    Pool::with_components(
        seeds,
        Network::new("test"),
        config,
        Arc::new(TcpTransport::new()),
        Arc::new(StaticHintResolver::new()),
    )
}

/// Polls `check` until it holds or `timeout` passes
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}
