//! Node discovery.
//!
//! Two sources feed the registry:
//!
//! - **Hints**: TXT-style records published under the network's static
//!   hostnames, fetched through a [`HintResolver`].
//! - **Peer exchange**: a breadth-first walk over known nodes, asking each
//!   for its peers with `Node.List`, until the pool has enough connections
//!   and records or every reachable node has been visited.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use nodepool_common::{NodepoolError, Result};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::pool::PoolInner;
use crate::records::methods;
use crate::registry::NodeRecord;

/// An endpoint advertised by a hint record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerHint {
    /// IP literal or host name
    pub host: String,
    pub port: u16,
}

impl PeerHint {
    pub fn into_record(self) -> NodeRecord {
        NodeRecord::new(self.host, self.port)
    }
}

/// Parses one hint record.
///
/// Two layouts are understood, both space-separated `key=value` tokens:
///
/// ```text
/// bitmark=v1 ip4=<addr> ip6=<addr> rpc=<port>
/// bitmark=v2 a=<host> r=<port>
/// ```
///
/// `ip4` is preferred over `ip6`. Anything else yields `None`.
///
/// # Example
///
/// ```
/// use nodepool_client::discovery::parse_txt_record;
///
/// let hint = parse_txt_record("bitmark=v2 a=node.example.org r=2130").unwrap();
/// assert_eq!(hint.host, "node.example.org");
/// assert_eq!(hint.port, 2130);
/// assert!(parse_txt_record("v=spf1 -all").is_none());
/// ```
pub fn parse_txt_record(record: &str) -> Option<PeerHint> {
    let values: HashMap<&str, &str> = record
        .split(' ')
        .filter_map(|item| item.split_once('='))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .collect();

    let (host, port) = match values.get("bitmark").copied() {
        Some("v1") => (
            values.get("ip4").or_else(|| values.get("ip6")),
            values.get("rpc"),
        ),
        Some("v2") => (values.get("a"), values.get("r")),
        _ => return None,
    };

    Some(PeerHint {
        host: host?.to_string(),
        port: port?.parse().ok()?,
    })
}

/// Future returned by [`HintResolver::resolve_hints`]
pub type HintFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<PeerHint>>> + Send + 'a>>;

/// Name-resolution collaborator used to bootstrap from hostnames.
pub trait HintResolver: Send + Sync {
    /// Endpoints advertised under `hostname`. Malformed entries are skipped.
    fn resolve_hints<'a>(&'a self, hostname: &'a str) -> HintFuture<'a>;
}

/// Resolver backed by a fixed table of hint records per hostname.
///
/// Hosts named in the records that are not IP literals are looked up with
/// the system resolver; entries that fail to resolve are dropped.
#[derive(Debug, Clone, Default)]
pub struct StaticHintResolver {
    records: HashMap<String, Vec<String>>,
}

impl StaticHintResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds hint records published under `hostname`.
    pub fn with_records<I, S>(mut self, hostname: impl Into<String>, records: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.records
            .entry(hostname.into())
            .or_default()
            .extend(records.into_iter().map(Into::into));
        self
    }
}

impl HintResolver for StaticHintResolver {
    fn resolve_hints<'a>(&'a self, hostname: &'a str) -> HintFuture<'a> {
        Box::pin(async move {
            let records = self.records.get(hostname).ok_or_else(|| {
                NodepoolError::InvalidAddress(format!("no hint records for {}", hostname))
            })?;

            let mut hints = Vec::new();
            for record in records {
                let Some(hint) = parse_txt_record(record) else {
                    debug!(hostname, record = %record, "skipping malformed hint");
                    continue;
                };
                match resolve_host(&hint).await {
                    Some(host) => hints.push(PeerHint { host, port: hint.port }),
                    None => debug!(hostname, host = %hint.host, "could not resolve hinted host"),
                }
            }
            Ok(hints)
        })
    }
}

/// IP literal for the hinted host, resolving names when needed.
async fn resolve_host(hint: &PeerHint) -> Option<String> {
    if hint.host.parse::<IpAddr>().is_ok() {
        return Some(hint.host.clone());
    }
    let mut addrs = tokio::net::lookup_host((hint.host.as_str(), hint.port)).await.ok()?;
    addrs.next().map(|addr| addr.ip().to_string())
}

/// Extracts peer records from a `Node.List` reply.
///
/// Nodes answer either `{"addresses": ["host:port", ...]}` or
/// `{"nodes": [{"connections": ["host:port", ...]}, ...]}`; for the latter the
/// first connection of each entry is used. Unparsable addresses are skipped.
///
/// # Errors
///
/// Returns `InvalidResponse` when the reply has neither shape.
pub fn parse_peer_list(reply: &Value) -> Result<Vec<NodeRecord>> {
    let addresses: Vec<&str> = if let Some(addresses) = reply.get("addresses").and_then(Value::as_array) {
        addresses.iter().filter_map(Value::as_str).collect()
    } else if let Some(nodes) = reply.get("nodes").and_then(Value::as_array) {
        nodes
            .iter()
            .filter_map(|node| node.get("connections")?.as_array()?.first()?.as_str())
            .collect()
    } else {
        return Err(NodepoolError::InvalidResponse(format!(
            "unexpected peer list: {}",
            reply
        )));
    };

    Ok(addresses
        .into_iter()
        .filter_map(|address| match NodeRecord::parse(address) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(address, error = %e, "skipping peer address");
                None
            }
        })
        .collect())
}

/// How a discovery pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// The readiness predicate holds
    Ready,
    /// Every reachable node was visited without reaching readiness
    Exhausted,
}

impl DiscoveryOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, DiscoveryOutcome::Ready)
    }

    /// `Err(DiscoveryExhausted)` unless ready, for callers that require it
    pub fn into_result(self) -> Result<()> {
        match self {
            DiscoveryOutcome::Ready => Ok(()),
            DiscoveryOutcome::Exhausted => Err(NodepoolError::DiscoveryExhausted),
        }
    }
}

/// Queries every hostname of the network and adds the advertised nodes.
///
/// Returns the number of new records. Failures are logged and skipped.
pub(crate) async fn resolve_hints(pool: &PoolInner) -> usize {
    let hostnames = &pool.network.static_hostnames;
    if hostnames.is_empty() {
        return 0;
    }

    let max_parallel = pool.config.discovery.max_parallel.max(1);
    let mut pending = hostnames.iter().cloned();
    let mut lookups = FuturesUnordered::new();
    let lookup = |hostname: String| {
        let resolver = Arc::clone(&pool.resolver);
        async move {
            let result = resolver.resolve_hints(&hostname).await;
            (hostname, result)
        }
    };
    lookups.extend(pending.by_ref().take(max_parallel).map(lookup));

    let mut added = 0;
    while let Some((hostname, result)) = lookups.next().await {
        if let Some(next) = pending.next() {
            lookups.push(lookup(next));
        }
        match result {
            Ok(hints) => {
                let records = hints.into_iter().map(PeerHint::into_record);
                let inserted = pool.registry.write().await.add_all_if_absent(records);
                debug!(hostname = %hostname, new = inserted.len(), "resolved hints");
                added += inserted.len();
            }
            Err(e) => warn!(hostname = %hostname, error = %e, "hint resolution failed"),
        }
    }
    added
}

/// Breadth-first peer exchange from the current registry.
///
/// At most `max_parallel` nodes are visited at once. Readiness is checked
/// before launching each visit and again before each visit connects, so the
/// walk stops growing as soon as the pool has enough. Nodes that cannot be
/// reached or fail `Node.List` contribute nothing.
pub(crate) async fn expand(pool: &PoolInner) -> DiscoveryOutcome {
    if pool.is_ready().await {
        return DiscoveryOutcome::Ready;
    }

    let max_parallel = pool.config.discovery.max_parallel.max(1);
    let mut queue: VecDeque<NodeRecord> = pool.registry.read().await.records().into();
    let mut visits = FuturesUnordered::new();
    let mut visited = 0usize;

    loop {
        while visits.len() < max_parallel && !pool.is_stopped() {
            if pool.is_ready().await {
                break;
            }
            let Some(record) = queue.pop_front() else {
                break;
            };
            visited += 1;
            visits.push(visit(pool, record));
        }

        match visits.next().await {
            Some(found) => queue.extend(found),
            None => break,
        }
    }

    let outcome = if pool.is_ready().await {
        DiscoveryOutcome::Ready
    } else {
        DiscoveryOutcome::Exhausted
    };
    let records = pool.registry.read().await.len();
    let connections = pool.connection_count().await;
    info!(?outcome, visited, records, connections, "discovery finished");
    outcome
}

/// Connects to one node and returns the peers it reported that were new.
async fn visit(pool: &PoolInner, record: NodeRecord) -> Vec<NodeRecord> {
    if pool.is_ready().await || pool.is_stopped() {
        return Vec::new();
    }

    let conn = match pool.connect_to_node(&record).await {
        Ok(conn) => conn,
        Err(e) => {
            debug!(node = %record.id, error = %e, "skipping unreachable node");
            return Vec::new();
        }
    };

    let params = json!({"Start": null, "Count": pool.config.discovery.peer_list_count});
    let reply = match conn
        .call(methods::NODE_LIST, params, pool.config.call_timeout)
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            debug!(node = %record.id, error = %e, "peer list failed");
            pool.record_failure(&record.id).await;
            return Vec::new();
        }
    };

    match parse_peer_list(&reply) {
        Ok(peers) => {
            let inserted = pool.registry.write().await.add_all_if_absent(peers);
            debug!(node = %record.id, new = inserted.len(), "peer list received");
            inserted
        }
        Err(e) => {
            warn!(node = %record.id, error = %e, "bad peer list");
            pool.record_failure(&record.id).await;
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v1_prefers_ip4() {
        let hint = parse_txt_record("bitmark=v1 ip4=10.0.0.1 ip6=::1 rpc=2130").unwrap();
        assert_eq!(
            hint,
            PeerHint {
                host: "10.0.0.1".into(),
                port: 2130
            }
        );
    }

    #[test]
    fn test_parse_v1_falls_back_to_ip6() {
        let hint = parse_txt_record("bitmark=v1 ip6=2001:db8::2 rpc=2131").unwrap();
        assert_eq!(hint.host, "2001:db8::2");
        assert_eq!(hint.port, 2131);
    }

    #[test]
    fn test_parse_v2() {
        let hint = parse_txt_record("bitmark=v2 a=127.0.0.2 r=3000 extra").unwrap();
        assert_eq!(hint.host, "127.0.0.2");
        assert_eq!(hint.port, 3000);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_txt_record("").is_none());
        assert!(parse_txt_record("bitmark=v3 a=1.2.3.4 r=1").is_none());
        assert!(parse_txt_record("bitmark=v1 rpc=2130").is_none());
        assert!(parse_txt_record("bitmark=v2 a=1.2.3.4").is_none());
        assert!(parse_txt_record("bitmark=v2 a=1.2.3.4 r=notaport").is_none());
        assert!(parse_txt_record("a=1.2.3.4 r=1").is_none());
    }

    #[tokio::test]
    async fn test_static_resolver_skips_bad_records() {
        let resolver = StaticHintResolver::new().with_records(
            "nodes.test",
            vec![
                "bitmark=v1 ip4=10.0.0.1 rpc=2130",
                "garbage",
                "bitmark=v2 a=10.0.0.2 r=2131",
            ],
        );

        let hints = resolver.resolve_hints("nodes.test").await.unwrap();
        assert_eq!(
            hints,
            vec![
                PeerHint {
                    host: "10.0.0.1".into(),
                    port: 2130
                },
                PeerHint {
                    host: "10.0.0.2".into(),
                    port: 2131
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_static_resolver_resolves_localhost() {
        let resolver =
            StaticHintResolver::new().with_records("nodes.test", vec!["bitmark=v2 a=localhost r=2130"]);
        let hints = resolver.resolve_hints("nodes.test").await.unwrap();
        assert_eq!(hints.len(), 1);
        assert!(hints[0].host.parse::<IpAddr>().is_ok());
    }

    #[tokio::test]
    async fn test_static_resolver_unknown_hostname() {
        let resolver = StaticHintResolver::new();
        assert!(resolver.resolve_hints("missing.test").await.is_err());
    }

    #[test]
    fn test_parse_peer_list_addresses() {
        let reply = json!({"addresses": ["10.0.0.1:2130", "bad", "[::1]:2131"]});
        let records = parse_peer_list(&reply).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["10.0.0.1:2130", "::1:2131"]);
    }

    #[test]
    fn test_parse_peer_list_nodes_uses_first_connection() {
        let reply = json!({"nodes": [
            {"connections": ["10.0.0.1:2130", "10.0.0.9:2130"]},
            {"connections": []},
            {"publicKey": "abc"},
            {"connections": ["2001:db8::1:2130"]}
        ]});
        let records = parse_peer_list(&reply).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "10.0.0.1:2130");
        assert_eq!(records[1].host, "2001:db8::1");
        assert_eq!(records[1].port, 2130);
    }

    #[test]
    fn test_parse_peer_list_rejects_unknown_shape() {
        assert!(matches!(
            parse_peer_list(&json!({"peers": []})),
            Err(NodepoolError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_outcome_into_result() {
        assert!(DiscoveryOutcome::Ready.into_result().is_ok());
        assert!(matches!(
            DiscoveryOutcome::Exhausted.into_result(),
            Err(NodepoolError::DiscoveryExhausted)
        ));
    }
}
