use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use nodepool_common::transport::{TlsOptions, TlsTransport, Transport};
use nodepool_common::{NodepoolError, Result};
use tokio::sync::{mpsc, watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionEvent, ConnectionState, EventSender};
use crate::discovery::{self, HintResolver, StaticHintResolver};
use crate::network::Network;
use crate::registry::{now_ms, NodeRecord, Registry};

/// Pool-wide availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Fewer than `minimum` connections have been established so far
    Unavailable,
    /// `minimum` was reached; stays set until the pool is stopped
    Available,
    /// Terminal
    Stopped,
}

/// Self-healing pool of node connections.
///
/// The pool keeps up to `enough` connections open, discovers nodes through
/// hint records and peer exchange, and renews itself on a schedule that
/// tightens when connections are scarce. A connection loss triggers an
/// immediate renewal pass.
///
/// Cloning is cheap and every clone drives the same pool. Independent pools
/// share nothing.
///
/// # Architecture
///
/// - One renewal task runs passes: drop dead connections, prune the
///   registry, resolve hints when due, expand by peer exchange, open
///   connections up to `enough`, then sleep by tier
/// - One event task receives connection lifecycle events and wakes the
///   renewal task early
/// - Both tasks hold weak references; dropping every `Pool` handle stops them
///
/// # Example
///
/// ```rust,no_run
/// use nodepool_client::{Network, NodeRecord, Pool};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> nodepool_common::Result<()> {
/// let seeds = vec![NodeRecord::parse("10.0.0.1:2130")?];
/// let pool = Pool::new(seeds, Network::testnet())?;
/// pool.start()?;
/// pool.wait_until_available(Duration::from_secs(30)).await?;
///
/// let tx = pool.read_transaction(serde_json::json!({"txId": "abc"})).await?;
/// pool.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    pub(crate) network: Network,
    pub(crate) config: PoolConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) resolver: Arc<dyn HintResolver>,
    pub(crate) registry: RwLock<Registry>,
    connections: RwLock<HashMap<String, Connection>>,
    status: watch::Sender<PoolStatus>,
    events: EventSender,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionEvent>>>,
    kick: Arc<Notify>,
    renewal: tokio::sync::Mutex<()>,
    last_hint_query: Mutex<Option<Instant>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    /// Creates a pool with default configuration, TLS without certificate
    /// verification and no hint records.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS client cannot be configured.
    pub fn new(seeds: impl IntoIterator<Item = NodeRecord>, network: Network) -> Result<Self> {
        let transport = TlsTransport::new(TlsOptions::permissive())?;
        Ok(Self::with_components(
            seeds,
            network,
            PoolConfig::default(),
            Arc::new(transport),
            Arc::new(StaticHintResolver::new()),
        ))
    }

    /// Creates a pool with explicit configuration and collaborators.
    ///
    /// The registry starts from `seeds` followed by the network's static
    /// nodes; unparsable static addresses are skipped.
    pub fn with_components(
        seeds: impl IntoIterator<Item = NodeRecord>,
        network: Network,
        config: PoolConfig,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn HintResolver>,
    ) -> Self {
        let mut registry = Registry::new();
        registry.add_all_if_absent(seeds);
        for address in &network.static_nodes {
            match NodeRecord::parse(address) {
                Ok(record) => {
                    registry.add_if_absent(record);
                }
                Err(e) => warn!(address = %address, error = %e, "ignoring static node"),
            }
        }

        let (events, event_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(PoolStatus::Unavailable);

        Self {
            inner: Arc::new(PoolInner {
                network,
                config,
                transport,
                resolver,
                registry: RwLock::new(registry),
                connections: RwLock::new(HashMap::new()),
                status,
                events,
                event_rx: Mutex::new(Some(event_rx)),
                kick: Arc::new(Notify::new()),
                renewal: tokio::sync::Mutex::new(()),
                last_hint_query: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Starts the renewal and event tasks. The first pass runs immediately.
    ///
    /// Calling `start` on a running pool does nothing.
    ///
    /// # Errors
    ///
    /// Returns `PoolUnavailable` if the pool has been stopped.
    pub fn start(&self) -> Result<()> {
        if self.inner.is_stopped() {
            return Err(NodepoolError::PoolUnavailable("pool has been stopped".into()));
        }

        let mut tasks = lock(&self.inner.tasks);
        if !tasks.is_empty() {
            return Ok(());
        }
        let Some(event_rx) = lock(&self.inner.event_rx).take() else {
            return Ok(());
        };

        let weak = Arc::downgrade(&self.inner);
        tasks.push(tokio::spawn(event_loop(weak.clone(), event_rx)));
        tasks.push(tokio::spawn(renewal_loop(weak, Arc::clone(&self.inner.kick))));

        info!(network = %self.inner.network.name, "pool started");
        Ok(())
    }

    /// Stops the pool: cancels scheduled work and closes every connection.
    ///
    /// Idempotent. Outstanding calls fail with `ConnectionClosed`.
    pub async fn stop(&self) {
        let previous = self.inner.status.send_replace(PoolStatus::Stopped);

        for task in lock(&self.inner.tasks).drain(..) {
            task.abort();
        }

        let connections: Vec<Connection> = self
            .inner
            .connections
            .write()
            .await
            .drain()
            .map(|(_, conn)| conn)
            .collect();
        for conn in &connections {
            conn.close().await;
        }

        if previous != PoolStatus::Stopped {
            info!(network = %self.inner.network.name, closed = connections.len(), "pool stopped");
        }
    }

    pub fn status(&self) -> PoolStatus {
        *self.inner.status.borrow()
    }

    /// Watch receiver for status changes
    pub fn subscribe(&self) -> watch::Receiver<PoolStatus> {
        self.inner.status.subscribe()
    }

    /// Waits until the pool is available.
    ///
    /// # Errors
    ///
    /// Returns `PoolUnavailable` if the pool stops or `timeout` passes first.
    pub async fn wait_until_available(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|status| *status != PoolStatus::Unavailable)
                .await
                .map(|status| *status)
        })
        .await;

        match waited {
            Ok(Ok(PoolStatus::Available)) => Ok(()),
            Ok(_) => Err(NodepoolError::PoolUnavailable("pool stopped".into())),
            Err(_) => Err(NodepoolError::PoolUnavailable(format!(
                "not available after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn network(&self) -> &Network {
        &self.inner.network
    }

    /// Number of open connections
    pub async fn alive_count(&self) -> usize {
        self.inner.connection_count().await
    }

    /// Number of known node records
    pub async fn record_count(&self) -> usize {
        self.inner.registry.read().await.len()
    }

    /// Ids of nodes with an open connection, sorted
    pub async fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.connections.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of the registry, suitable for persisting and passing back
    /// as seeds later
    pub async fn node_records(&self) -> Vec<NodeRecord> {
        self.inner.registry.read().await.records()
    }

    /// Runs one renewal pass now and returns the delay the scheduler would
    /// wait before the next one.
    pub async fn renew(&self) -> Duration {
        self.inner.renew().await
    }

    pub(crate) fn inner(&self) -> &PoolInner {
        &self.inner
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("network", &self.inner.network.name)
            .field("status", &self.status())
            .finish()
    }
}

impl PoolInner {
    pub(crate) fn is_stopped(&self) -> bool {
        *self.status.borrow() == PoolStatus::Stopped
    }

    pub(crate) fn status(&self) -> PoolStatus {
        *self.status.borrow()
    }

    pub(crate) async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Open connections, for issuing calls
    pub(crate) async fn live_connections(&self) -> Vec<Connection> {
        self.connections
            .read()
            .await
            .values()
            .filter(|conn| conn.is_connected())
            .cloned()
            .collect()
    }

    /// Discovery readiness: enough connections and enough known records
    pub(crate) async fn is_ready(&self) -> bool {
        let discovery = &self.config.discovery;
        self.connection_count().await >= discovery.enough_alive_nodes
            && self.registry.read().await.len() >= discovery.enough_records
    }

    pub(crate) async fn record_success(&self, id: &str) {
        self.registry.write().await.mark_success(id, now_ms());
    }

    pub(crate) async fn record_failure(&self, id: &str) {
        self.registry.write().await.mark_failure(id, now_ms());
    }

    /// Health bookkeeping after a call: success marks the node alive, a lost
    /// connection marks it failed, anything else leaves it as is.
    pub(crate) async fn record_call_outcome<T>(&self, id: &str, result: &Result<T>) {
        match result {
            Ok(_) => self.record_success(id).await,
            Err(e) if e.is_connection_lost() => self.record_failure(id).await,
            Err(_) => {}
        }
    }

    /// Returns the open connection to `record`, opening one if needed.
    ///
    /// A new connection is added to the live map and the record marked
    /// alive; a failed attempt marks the record failed.
    pub(crate) async fn connect_to_node(&self, record: &NodeRecord) -> Result<Connection> {
        if let Some(conn) = self.connections.read().await.get(&record.id) {
            if conn.is_connected() {
                return Ok(conn.clone());
            }
        }
        if self.is_stopped() {
            return Err(NodepoolError::PoolUnavailable("pool has been stopped".into()));
        }

        let opened = Connection::open(
            &record.host,
            record.port,
            self.transport.as_ref(),
            &self.config.connection_options(),
            Some(self.events.clone()),
        )
        .await;

        let conn = match opened {
            Ok(conn) => conn,
            Err(e) => {
                self.record_failure(&record.id).await;
                return Err(e);
            }
        };

        self.record_success(&record.id).await;
        let inserted = {
            let mut connections = self.connections.write().await;
            // `stop` flags the status before draining the map under this lock
            if self.is_stopped() {
                Err(NodepoolError::PoolUnavailable("pool has been stopped".into()))
            } else {
                match connections.get(&record.id) {
                    Some(existing) if existing.is_connected() => Ok(Some(existing.clone())),
                    _ => {
                        connections.insert(record.id.clone(), conn.clone());
                        Ok(None)
                    }
                }
            }
        };

        match inserted {
            Err(e) => {
                conn.close().await;
                Err(e)
            }
            Ok(Some(existing)) => {
                // Lost a race with another task connecting to the same node
                conn.close().await;
                Ok(existing)
            }
            Ok(None) => {
                debug!(node = %record.id, "connection added to pool");
                Ok(conn)
            }
        }
    }

    /// Drops connections that are no longer connected, touching their
    /// records, and returns the ids still connected.
    async fn remove_dead_connections(&self, now: u64) -> HashSet<String> {
        let removed: Vec<String> = {
            let mut connections = self.connections.write().await;
            let dead: Vec<String> = connections
                .iter()
                .filter(|(_, conn)| !conn.is_connected())
                .map(|(id, _)| id.clone())
                .collect();
            for id in &dead {
                connections.remove(id);
            }
            dead
        };

        if !removed.is_empty() {
            let mut registry = self.registry.write().await;
            for id in &removed {
                registry.touch(id, now);
            }
            debug!(removed = removed.len(), "removed closed connections");
        }

        self.connections.read().await.keys().cloned().collect()
    }

    /// Opens connections to known nodes until `enough` are open or the
    /// candidates run out. Up to the shortfall are attempted at once.
    async fn open_enough_connections(&self) {
        let enough = self.config.enough;
        let (shortfall, connected) = {
            let connections = self.connections.read().await;
            (
                enough.saturating_sub(connections.len()),
                connections.keys().cloned().collect::<HashSet<_>>(),
            )
        };
        if shortfall == 0 {
            return;
        }

        let mut candidates: Vec<NodeRecord> = self
            .registry
            .read()
            .await
            .records()
            .into_iter()
            .filter(|record| !connected.contains(&record.id))
            .collect();
        // Known-good nodes first, never-tried next, known-dead last
        candidates.sort_by_key(|record| match record.alive {
            Some(true) => 0,
            None => 1,
            Some(false) => 2,
        });
        let mut candidates = candidates.into_iter();

        let mut attempts = FuturesUnordered::new();
        loop {
            while attempts.len() < shortfall && !self.is_stopped() {
                if self.connection_count().await >= enough {
                    break;
                }
                let Some(record) = candidates.next() else {
                    break;
                };
                attempts.push(async move {
                    let result = self.connect_to_node(&record).await;
                    (record, result)
                });
            }

            match attempts.next().await {
                Some((record, Err(e))) => {
                    debug!(node = %record.id, error = %e, "could not open connection");
                }
                Some(_) => {}
                None => break,
            }
        }
    }

    /// Hints are resolved every pass while below `minimum`, at most once per
    /// `hint_refresh_interval` below `enough`, and never at `enough`.
    fn hints_due(&self, alive: usize) -> bool {
        if alive < self.config.minimum {
            return true;
        }
        if alive >= self.config.enough {
            return false;
        }
        let last_query = *lock(&self.last_hint_query);
        last_query.map_or(true, |at| at.elapsed() >= self.config.hint_refresh_interval)
    }

    /// One renewal pass. Returns the delay before the next one.
    pub(crate) async fn renew(&self) -> Duration {
        let _pass = self.renewal.lock().await;
        if self.is_stopped() {
            return self.config.renewal.too_few;
        }

        let now = now_ms();
        let connected = self.remove_dead_connections(now).await;
        let pruned = self
            .registry
            .write()
            .await
            .prune(now, self.config.max_dead_retention, &connected);
        if pruned > 0 {
            debug!(pruned, "pruned dead records");
        }

        if self.hints_due(connected.len()) {
            let added = discovery::resolve_hints(self).await;
            *lock(&self.last_hint_query) = Some(Instant::now());
            if added > 0 {
                debug!(added, "records added from hints");
            }
        }

        let outcome = discovery::expand(self).await;
        self.open_enough_connections().await;

        let alive = self.connection_count().await;
        if alive >= self.config.minimum {
            let became_available = self.status.send_if_modified(|status| {
                if *status == PoolStatus::Unavailable {
                    *status = PoolStatus::Available;
                    true
                } else {
                    false
                }
            });
            if became_available {
                info!(alive, "pool available");
            }
        }

        let delay = self.config.renewal_delay(alive);
        let records = self.registry.read().await.len();
        info!(
            alive,
            records,
            ?outcome,
            next_pass_ms = delay.as_millis() as u64,
            "renewal pass complete"
        );
        delay
    }

    async fn handle_event(&self, event: ConnectionEvent) {
        if self.is_stopped() {
            return;
        }

        {
            let mut connections = self.connections.write().await;
            if connections
                .get(&event.node_id)
                .map_or(false, |conn| !conn.is_connected())
            {
                connections.remove(&event.node_id);
            }
        }

        {
            let now = now_ms();
            let mut registry = self.registry.write().await;
            registry.touch(&event.node_id, now);
            if event.state == ConnectionState::Failed {
                registry.mark_failure(&event.node_id, now);
            }
        }

        info!(node = %event.node_id, state = ?event.state, "connection lost, renewing");
        self.kick.notify_one();
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn renewal_loop(pool: Weak<PoolInner>, kick: Arc<Notify>) {
    loop {
        let delay = match pool.upgrade() {
            Some(inner) if !inner.is_stopped() => inner.renew().await,
            _ => return,
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = kick.notified() => {}
        }
    }
}

async fn event_loop(pool: Weak<PoolInner>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = pool.upgrade() else {
            return;
        };
        inner.handle_event(event).await;
    }
}
