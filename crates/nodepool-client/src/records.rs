//! Ledger records and method helpers.
//!
//! The pool never looks inside the records it broadcasts. Anything passed to
//! [`Pool::register_assets`] and friends implements [`RpcRecord`], producing
//! its wire parameter and absorbing the per-node results once a quorum has
//! answered.

use nodepool_common::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::majority_field;
use crate::calls::{BatchOutcome, BroadcastOutcome};
use crate::pool::Pool;

/// Remote method names understood by ledger nodes.
pub mod methods {
    pub const NODE_LIST: &str = "Node.List";
    pub const ASSETS_REGISTER: &str = "Assets.Register";
    pub const BITMARKS_ISSUE: &str = "Bitmarks.Issue";
    pub const BITMARK_TRANSFER: &str = "Bitmark.Transfer";
    pub const BITMARKS_PROOF: &str = "Bitmarks.Proof";
    pub const BITMARKS_PAY: &str = "Bitmarks.Pay";
    pub const TRANSACTION_GET: &str = "Transaction.Get";
    pub const ASSETS_GET: &str = "Assets.Get";
}

/// A record that can be sent to the ledger.
pub trait RpcRecord {
    /// Serializable parameter form sent to nodes
    fn rpc_param(&self) -> Value;

    /// Absorbs every node's answer for this record.
    ///
    /// `results` holds one entry per responding node, in arrival order. Use
    /// [`majority`](crate::aggregate::majority) to settle disagreement.
    fn update_from_rpc(&mut self, results: &[Value]) -> Result<()>;
}

/// Payment instructions agreed on by the majority of responding nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSummary {
    pub pay_id: Option<Value>,
    pub pay_nonce: Option<Value>,
    pub difficulty: Option<Value>,
    pub payments: Option<Value>,
}

impl PaymentSummary {
    fn from_results(results: &[Value], keys: &[&str]) -> Self {
        let field = |key: &str| {
            if keys.contains(&key) {
                majority_field(results, key).filter(|v| !v.is_null())
            } else {
                None
            }
        };
        Self {
            pay_id: field("payId"),
            pay_nonce: field("payNonce"),
            difficulty: field("difficulty"),
            payments: field("payments"),
        }
    }
}

/// Outcome of a record broadcast: raw node replies, the per-node failures
/// that did not prevent quorum, and the majority payment instructions.
#[derive(Debug)]
pub struct Submission {
    pub results: Vec<Value>,
    pub errors: Vec<nodepool_common::NodeFailure>,
    pub payment: PaymentSummary,
}

impl Pool {
    /// Broadcasts `items` with `method` and feeds each item its per-node
    /// results.
    async fn submit_batch<R: RpcRecord>(
        &self,
        method: &str,
        items: &mut [R],
        item_key: &str,
    ) -> Result<BatchOutcome> {
        let params: Vec<Value> = items.iter().map(RpcRecord::rpc_param).collect();
        let outcome = self
            .batch_broadcast(method, params, self.config().minimum, Some(item_key))
            .await?;
        for (item, results) in items.iter_mut().zip(&outcome.per_item) {
            item.update_from_rpc(results)?;
        }
        Ok(outcome)
    }

    /// Registers assets (`Assets.Register`) on a quorum of nodes.
    pub async fn register_assets<R: RpcRecord>(&self, assets: &mut [R]) -> Result<BatchOutcome> {
        self.submit_batch(methods::ASSETS_REGISTER, assets, "assets").await
    }

    /// Issues bitmarks (`Bitmarks.Issue`) on a quorum of nodes.
    ///
    /// The summary carries the majority `payId`, `payNonce` and `difficulty`.
    pub async fn issue_bitmarks<R: RpcRecord>(&self, issues: &mut [R]) -> Result<(BatchOutcome, PaymentSummary)> {
        let outcome = self.submit_batch(methods::BITMARKS_ISSUE, issues, "issues").await?;
        let payment = PaymentSummary::from_results(&outcome.replies, &["payId", "payNonce", "difficulty"]);
        Ok((outcome, payment))
    }

    /// Transfers a bitmark (`Bitmark.Transfer`) on a quorum of nodes.
    ///
    /// The summary carries the majority `payId` and `payments`.
    pub async fn transfer_bitmark<R: RpcRecord>(&self, transfer: &mut R) -> Result<Submission> {
        let BroadcastOutcome { results, errors } = self
            .broadcast(methods::BITMARK_TRANSFER, transfer.rpc_param(), self.config().minimum)
            .await?;
        transfer.update_from_rpc(&results)?;
        let payment = PaymentSummary::from_results(&results, &["payId", "payments"]);
        Ok(Submission {
            results,
            errors,
            payment,
        })
    }

    /// Submits a hashcash payment proof (`Bitmarks.Proof`).
    pub async fn pay_by_hashcash(&self, params: Value) -> Result<BroadcastOutcome> {
        self.broadcast(methods::BITMARKS_PROOF, params, self.config().minimum)
            .await
    }

    /// Submits a payment (`Bitmarks.Pay`).
    pub async fn pay_bitmark(&self, params: Value) -> Result<BroadcastOutcome> {
        self.broadcast(methods::BITMARKS_PAY, params, self.config().minimum)
            .await
    }

    /// Reads a transaction (`Transaction.Get`) from any one node.
    pub async fn read_transaction(&self, params: Value) -> Result<Value> {
        self.read(methods::TRANSACTION_GET, params).await
    }

    /// Reads assets (`Assets.Get`) from any one node.
    pub async fn read_asset(&self, params: Value) -> Result<Value> {
        self.read(methods::ASSETS_GET, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payment_summary_issue_fields() {
        let results = vec![
            json!({"payId": "p1", "payNonce": "n1", "difficulty": "0f", "payments": "x"}),
            json!({"payId": "p1", "payNonce": "n2", "difficulty": "0f"}),
            json!({"payId": "p2", "payNonce": "n2", "difficulty": "0f"}),
        ];
        let summary = PaymentSummary::from_results(&results, &["payId", "payNonce", "difficulty"]);

        assert_eq!(summary.pay_id, Some(json!("p1")));
        assert_eq!(summary.pay_nonce, Some(json!("n2")));
        assert_eq!(summary.difficulty, Some(json!("0f")));
        assert_eq!(summary.payments, None);
    }

    #[test]
    fn test_payment_summary_missing_fields_are_none() {
        let results = vec![json!({"txId": "t"})];
        let summary = PaymentSummary::from_results(&results, &["payId", "payments"]);
        assert_eq!(summary, PaymentSummary::default());
    }

    #[test]
    fn test_payment_summary_serializes_camel_case() {
        let summary = PaymentSummary {
            pay_id: Some(json!("p")),
            ..PaymentSummary::default()
        };
        let wire = serde_json::to_value(&summary).unwrap();
        assert_eq!(wire["payId"], json!("p"));
        assert!(wire.get("pay_id").is_none());
    }
}
