use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nodepool_common::{NodepoolError, Result};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Canonical record id for an endpoint
pub fn node_id(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

/// A known node and its health metadata.
///
/// `alive` is `None` until a connection has been attempted. Timestamps are
/// Unix milliseconds so a caller can persist the registry and reload it in a
/// later process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub alive: Option<bool>,
    /// Last time the node was observed (connected, disconnected or first failed)
    pub last_seen: Option<u64>,
    /// Last successful connection
    pub last_success: Option<u64>,
}

impl NodeRecord {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            id: node_id(&host, port),
            host,
            port,
            alive: None,
            last_seen: None,
            last_success: None,
        }
    }

    /// Parses a `host:port` address.
    ///
    /// The port is taken after the last `:`, so unbracketed IPv6 literals
    /// (`::1:2130`) work. Brackets around the host are stripped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` when either part is missing or the port is not
    /// a valid `u16`.
    pub fn parse(address: &str) -> Result<Self> {
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| NodepoolError::InvalidAddress(address.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() || port.is_empty() {
            return Err(NodepoolError::InvalidAddress(address.to_string()));
        }
        let port: u16 = port.parse()?;
        Ok(Self::new(host, port))
    }

    /// Alive and seen successfully within `expiry`.
    pub fn is_alive(&self, now: u64, expiry: Duration) -> bool {
        self.alive == Some(true)
            && self
                .last_success
                .map_or(false, |at| now.saturating_sub(at) <= expiry.as_millis() as u64)
    }

    fn is_expired_dead(&self, now: u64, max_dead_retention: Duration) -> bool {
        self.alive == Some(false)
            && self
                .last_seen
                .map_or(false, |at| now.saturating_sub(at) > max_dead_retention.as_millis() as u64)
    }
}

/// Deduplicated set of known nodes, keyed by id.
///
/// Iteration follows insertion order, so discovery visits nodes in the order
/// they were learned.
#[derive(Debug, Default)]
pub struct Registry {
    records: HashMap<String, NodeRecord>,
    order: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the record unless its id is already known.
    ///
    /// Returns whether it was inserted.
    pub fn add_if_absent(&mut self, record: NodeRecord) -> bool {
        if self.records.contains_key(&record.id) {
            return false;
        }
        self.order.push(record.id.clone());
        self.records.insert(record.id.clone(), record);
        true
    }

    /// Inserts every record whose id is not yet known and returns those
    /// actually inserted.
    pub fn add_all_if_absent(&mut self, records: impl IntoIterator<Item = NodeRecord>) -> Vec<NodeRecord> {
        records
            .into_iter()
            .filter_map(|record| {
                let inserted = record.clone();
                self.add_if_absent(record).then_some(inserted)
            })
            .collect()
    }

    pub fn lookup(&self, id: &str) -> Option<&NodeRecord> {
        self.records.get(id)
    }

    /// Records a successful connection.
    pub fn mark_success(&mut self, id: &str, now: u64) {
        if let Some(record) = self.records.get_mut(id) {
            record.alive = Some(true);
            record.last_seen = Some(now);
            record.last_success = Some(now);
        }
    }

    /// Records a failed connection or call.
    ///
    /// `last_seen` keeps its earlier value when there is one, so the dead
    /// retention window counts from when the node was last known reachable
    /// rather than from the latest retry.
    pub fn mark_failure(&mut self, id: &str, now: u64) {
        if let Some(record) = self.records.get_mut(id) {
            record.alive = Some(false);
            record.last_seen.get_or_insert(now);
        }
    }

    /// Updates `last_seen` without touching health.
    pub fn touch(&mut self, id: &str, now: u64) {
        if let Some(record) = self.records.get_mut(id) {
            record.last_seen = Some(now);
        }
    }

    /// Removes dead records not seen for longer than `max_dead_retention`.
    ///
    /// Ids in `protected` (nodes with an open connection) are never removed.
    /// Returns the number of records removed.
    pub fn prune(&mut self, now: u64, max_dead_retention: Duration, protected: &HashSet<String>) -> usize {
        let before = self.records.len();
        self.records.retain(|id, record| {
            protected.contains(id) || !record.is_expired_dead(now, max_dead_retention)
        });
        let records = &self.records;
        self.order.retain(|id| records.contains_key(id));
        before - self.records.len()
    }

    /// Records currently considered alive
    pub fn alive_records(&self, now: u64, expiry: Duration) -> Vec<NodeRecord> {
        self.iter().filter(|r| r.is_alive(now, expiry)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every record in insertion order
    pub fn records(&self) -> Vec<NodeRecord> {
        self.iter().cloned().collect()
    }

    fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn test_record_parse() {
        let record = NodeRecord::parse("10.0.0.1:2130").unwrap();
        assert_eq!(record.host, "10.0.0.1");
        assert_eq!(record.port, 2130);
        assert_eq!(record.id, "10.0.0.1:2130");
        assert_eq!(record.alive, None);
    }

    #[test]
    fn test_record_parse_ipv6_splits_on_last_colon() {
        let record = NodeRecord::parse("2001:db8::1:2130").unwrap();
        assert_eq!(record.host, "2001:db8::1");
        assert_eq!(record.port, 2130);

        let bracketed = NodeRecord::parse("[::1]:2131").unwrap();
        assert_eq!(bracketed.host, "::1");
        assert_eq!(bracketed.port, 2131);
    }

    #[test]
    fn test_record_parse_rejects_garbage() {
        assert!(NodeRecord::parse("no-port").is_err());
        assert!(NodeRecord::parse(":2130").is_err());
        assert!(NodeRecord::parse("host:").is_err());
        assert!(NodeRecord::parse("host:99999").is_err());
    }

    #[test]
    fn test_add_same_id_twice_is_deduplicated() {
        let mut registry = Registry::new();
        assert!(registry.add_if_absent(NodeRecord::new("10.0.0.1", 2130)));
        assert!(!registry.add_if_absent(NodeRecord::new("10.0.0.1", 2130)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_all_returns_inserted_subset() {
        let mut registry = Registry::new();
        registry.add_if_absent(NodeRecord::new("a", 1));

        let inserted = registry.add_all_if_absent(vec![
            NodeRecord::new("a", 1),
            NodeRecord::new("b", 2),
            NodeRecord::new("b", 2),
            NodeRecord::new("c", 3),
        ]);

        let ids: Vec<_> = inserted.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b:2", "c:3"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_records_keep_insertion_order() {
        let mut registry = Registry::new();
        for port in [5, 1, 3] {
            registry.add_if_absent(NodeRecord::new("h", port));
        }
        let ports: Vec<_> = registry.records().iter().map(|r| r.port).collect();
        assert_eq!(ports, vec![5, 1, 3]);
    }

    #[test]
    fn test_mark_success_and_failure() {
        let mut registry = Registry::new();
        registry.add_if_absent(NodeRecord::new("a", 1));

        registry.mark_success("a:1", 1_000);
        let record = registry.lookup("a:1").unwrap();
        assert_eq!(record.alive, Some(true));
        assert_eq!(record.last_success, Some(1_000));
        assert_eq!(record.last_seen, Some(1_000));

        registry.mark_failure("a:1", 5_000);
        let record = registry.lookup("a:1").unwrap();
        assert_eq!(record.alive, Some(false));
        assert_eq!(record.last_seen, Some(1_000));
        assert_eq!(record.last_success, Some(1_000));
    }

    #[test]
    fn test_first_failure_sets_last_seen() {
        let mut registry = Registry::new();
        registry.add_if_absent(NodeRecord::new("a", 1));
        registry.mark_failure("a:1", 7_000);
        registry.mark_failure("a:1", 9_000);
        assert_eq!(registry.lookup("a:1").unwrap().last_seen, Some(7_000));
    }

    #[test]
    fn test_alive_respects_expiry() {
        let mut registry = Registry::new();
        registry.add_if_absent(NodeRecord::new("a", 1));
        registry.add_if_absent(NodeRecord::new("b", 2));
        registry.mark_success("a:1", 0);
        registry.mark_success("b:2", DAY.as_millis() as u64);

        let now = DAY.as_millis() as u64 + 1;
        let alive = registry.alive_records(now, DAY);
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].id, "b:2");
    }

    #[test]
    fn test_prune_removes_only_expired_dead() {
        let mut registry = Registry::new();
        for (host, port) in [("dead-old", 1), ("dead-new", 2), ("alive", 3), ("untried", 4)] {
            registry.add_if_absent(NodeRecord::new(host, port));
        }
        registry.mark_failure("dead-old:1", 0);
        registry.mark_failure("dead-new:2", 5 * DAY.as_millis() as u64);
        registry.mark_success("alive:3", 0);

        let now = 8 * DAY.as_millis() as u64;
        let removed = registry.prune(now, 7 * DAY, &HashSet::new());

        assert_eq!(removed, 1);
        assert!(registry.lookup("dead-old:1").is_none());
        assert!(registry.lookup("dead-new:2").is_some());
        assert!(registry.lookup("alive:3").is_some());
        assert!(registry.lookup("untried:4").is_some());
        assert_eq!(registry.records().len(), 3);
    }

    #[test]
    fn test_prune_keeps_protected_ids() {
        let mut registry = Registry::new();
        registry.add_if_absent(NodeRecord::new("a", 1));
        registry.mark_failure("a:1", 0);

        let protected: HashSet<String> = ["a:1".to_string()].into_iter().collect();
        assert_eq!(registry.prune(u64::MAX, DAY, &protected), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_record_serde_snapshot() {
        let mut record = NodeRecord::new("10.1.1.1", 2130);
        record.alive = Some(true);
        record.last_success = Some(42);

        let json = serde_json::to_string(&record).unwrap();
        let restored: NodeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, restored);
    }
}
