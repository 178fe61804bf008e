use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::ids::{GasAccountId, TransactionId};
use crate::time::TimestampSeconds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionType {
    Invoke,
    Transfer,
    Deploy,
}

/// A wallet account authorising the transaction, together with its scope
/// (e.g. Neo N3's `CalledByEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signer {
    pub account: String,
    pub scopes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionStatus {
    Created,
    Signing,
    Broadcast,
    Confirmed,
    Failed,
    Expired,
}

/// State machine per spec.md §4.1:
///
/// ```text
/// created --sign--> signing --submit--> broadcast --confirm--> confirmed
///    |                  |                   |
///    +------fail--------+--------fail------>failed
///                                         broadcast --expire--> expired
///                                         broadcast --reorg--> broadcast
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedTransaction {
    pub id: TransactionId,
    pub service: String,
    pub entity_id: String,
    pub entity_type: String,
    pub tx_type: TransactionType,
    pub script_bytes: Vec<u8>,
    pub signers: Vec<Signer>,
    pub priority: Priority,
    pub status: TransactionStatus,
    pub gas_account: GasAccountId,
    pub network_fee: Amount,
    pub hash: Option<String>,
    pub gas_consumed: Option<u64>,
    pub block_height: Option<u64>,
    pub block_time: Option<TimestampSeconds>,
    pub error: Option<String>,
    pub valid_until_block: Option<u64>,
    pub claimed_by: Option<String>,
    pub claim_expires_at: Option<TimestampSeconds>,
    pub created: TimestampSeconds,
    pub updated: TimestampSeconds,
    pub result_payload: Option<serde_json::Value>,
}

impl ManagedTransaction {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Confirmed | TransactionStatus::Failed | TransactionStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionEventKind {
    Created,
    Signed,
    Broadcast,
    SeenInMempool,
    Confirmed,
    Reorged,
    Failed,
    Expired,
}

/// Append-only per-transaction audit trail; survives deletion of the
/// originating oracle request / trigger / price round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub transaction_id: TransactionId,
    pub kind: TransactionEventKind,
    pub timestamp: TimestampSeconds,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_recognised() {
        let mut tx = sample();
        tx.status = TransactionStatus::Confirmed;
        assert!(tx.is_terminal());
        tx.status = TransactionStatus::Broadcast;
        assert!(!tx.is_terminal());
    }

    fn sample() -> ManagedTransaction {
        ManagedTransaction {
            id: TransactionId::new(),
            service: "user-7".into(),
            entity_id: "entity".into(),
            entity_type: "oracle-request".into(),
            tx_type: TransactionType::Invoke,
            script_bytes: vec![1, 2, 3],
            signers: vec![],
            priority: Priority::Normal,
            status: TransactionStatus::Created,
            gas_account: GasAccountId::new(),
            network_fee: Amount::ZERO,
            hash: None,
            gas_consumed: None,
            block_height: None,
            block_time: None,
            error: None,
            valid_until_block: None,
            claimed_by: None,
            claim_expires_at: None,
            created: 0,
            updated: 0,
            result_payload: None,
        }
    }
}
