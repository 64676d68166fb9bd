//! Quorum broadcast and fallback read.

use futures::stream::{FuturesUnordered, StreamExt};
use nodepool_common::{NodeFailure, NodepoolError, Result};
use rand::seq::SliceRandom;
use serde_json::Value;
use tracing::{debug, warn};

use crate::aggregate::transpose;
use crate::pool::{Pool, PoolStatus};

/// Successful broadcast: every node reply in arrival order, plus the nodes
/// that failed without preventing quorum.
#[derive(Debug)]
pub struct BroadcastOutcome {
    pub results: Vec<Value>,
    pub errors: Vec<NodeFailure>,
}

/// Successful batch broadcast.
#[derive(Debug)]
pub struct BatchOutcome {
    /// For each item, every well-formed node answer for it
    pub per_item: Vec<Vec<Value>>,
    /// The well-formed node replies themselves, in arrival order
    pub replies: Vec<Value>,
    pub errors: Vec<NodeFailure>,
}

impl Pool {
    fn ensure_available(&self) -> Result<()> {
        match self.inner().status() {
            PoolStatus::Available => Ok(()),
            status => Err(NodepoolError::PoolUnavailable(format!("pool is {:?}", status))),
        }
    }

    /// Calls every open connection concurrently and collects outcomes as
    /// they arrive.
    async fn fan_out(&self, method: &str, params: Value) -> (Vec<(String, Value)>, Vec<NodeFailure>) {
        let pool = self.inner();
        let timeout = pool.config.call_timeout;

        let mut calls: FuturesUnordered<_> = pool
            .live_connections()
            .await
            .into_iter()
            .map(|conn| {
                let params = params.clone();
                async move {
                    let result = conn.call(method, params, timeout).await;
                    (conn.id().to_string(), result)
                }
            })
            .collect();

        let mut results = Vec::new();
        let mut errors = Vec::new();
        while let Some((node_id, result)) = calls.next().await {
            pool.record_call_outcome(&node_id, &result).await;
            match result {
                Ok(value) => results.push((node_id, value)),
                Err(e) => {
                    debug!(node = %node_id, method, error = %e, "broadcast call failed");
                    errors.push(NodeFailure::new(node_id, e));
                }
            }
        }
        (results, errors)
    }

    /// Sends `method(params)` to every open connection and requires
    /// `minimum` successes.
    ///
    /// Each node gets the pool's call timeout; a slow node never holds up
    /// the others' results, and the call resolves once every node has
    /// answered, failed or timed out.
    ///
    /// # Errors
    ///
    /// - `PoolUnavailable` if the pool is not available
    /// - `NotEnoughResponses` with the per-node errors if fewer than
    ///   `minimum` nodes succeed
    pub async fn broadcast(&self, method: &str, params: Value, minimum: usize) -> Result<BroadcastOutcome> {
        self.ensure_available()?;
        let (results, errors) = self.fan_out(method, params).await;

        if results.len() < minimum {
            warn!(method, received = results.len(), required = minimum, "quorum not reached");
            return Err(NodepoolError::NotEnoughResponses {
                required: minimum,
                received: results.len(),
                errors,
            });
        }

        Ok(BroadcastOutcome {
            results: results.into_iter().map(|(_, value)| value).collect(),
            errors,
        })
    }

    /// Broadcasts an ordered list of items in one call per node and
    /// transposes the replies per item.
    ///
    /// `item_key` names the field of each reply holding the per-item array;
    /// `None` means the reply is the array. A reply without exactly one
    /// entry per item counts as that node's failure.
    ///
    /// # Errors
    ///
    /// Same as [`broadcast`](Self::broadcast).
    pub async fn batch_broadcast(
        &self,
        method: &str,
        items: Vec<Value>,
        minimum: usize,
        item_key: Option<&str>,
    ) -> Result<BatchOutcome> {
        self.ensure_available()?;
        let item_count = items.len();
        let (results, mut errors) = self.fan_out(method, Value::Array(items)).await;

        let replies: Vec<Value> = results.iter().map(|(_, value)| value.clone()).collect();
        let (per_item, malformed) = transpose(&replies, item_key, item_count);

        let mut replies = replies;
        for index in malformed.iter().rev() {
            replies.remove(*index);
        }
        for index in malformed {
            let node_id = &results[index].0;
            warn!(node = %node_id, method, "reply does not match the batch");
            errors.push(NodeFailure::new(
                node_id.clone(),
                NodepoolError::InvalidResponse(format!("expected {} entries", item_count)),
            ));
        }

        if replies.len() < minimum {
            warn!(method, received = replies.len(), required = minimum, "quorum not reached");
            return Err(NodepoolError::NotEnoughResponses {
                required: minimum,
                received: replies.len(),
                errors,
            });
        }

        Ok(BatchOutcome {
            per_item,
            replies,
            errors,
        })
    }

    /// Asks one node at a time until one answers.
    ///
    /// Alive nodes are tried in random order, reusing open connections and
    /// opening new ones as needed. Failures before the first success are only
    /// logged.
    ///
    /// # Errors
    ///
    /// - `PoolUnavailable` if the pool is not available
    /// - `NoNodes` if no node is currently alive
    /// - the last node's error if every node fails
    pub async fn read(&self, method: &str, params: Value) -> Result<Value> {
        self.ensure_available()?;
        let pool = self.inner();

        let mut candidates = pool
            .registry
            .read()
            .await
            .alive_records(crate::registry::now_ms(), pool.config.alive_expiry);
        candidates.shuffle(&mut rand::thread_rng());

        let mut last_error = None;
        for record in candidates {
            let conn = match pool.connect_to_node(&record).await {
                Ok(conn) => conn,
                Err(e) => {
                    debug!(node = %record.id, method, error = %e, "read candidate unreachable");
                    last_error = Some(e);
                    continue;
                }
            };

            let result = conn.call(method, params.clone(), pool.config.call_timeout).await;
            pool.record_call_outcome(&record.id, &result).await;
            match result {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(node = %record.id, method, error = %e, "read failed, trying next node");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(NodepoolError::NoNodes))
    }
}
