//! The typed view of the blockchain node the rest of the engine consumes.
//! A real adapter (RPC client, pooled, round-robining across nodes) is an
//! external collaborator; [`MockBlockchainAdapter`] backs the engine's own
//! tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use service_core::error::EngineError;
use tokio::sync::{watch, Mutex};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResult {
    pub hash: String,
    /// True when the adapter recognised an already-broadcast hash rather
    /// than accepting a new submission — double-broadcast on retry is
    /// idempotent, not an error (spec.md §4.1 "Failure semantics").
    pub already_known: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub hash: String,
    pub confirmations: u64,
    pub block_height: u64,
    pub block_time: u64,
    pub gas_consumed: u64,
}

/// A contract event emitted within a block, as consumed by the automation
/// engine's `blockchain-event` trigger evaluator (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEvent {
    pub contract_hash: String,
    pub event_name: String,
    pub params: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct BlockEvent {
    pub height: u64,
    /// Hashes the adapter still considers confirmed at this height. A
    /// previously broadcast hash absent here signals a reorg.
    pub confirmed_hashes: Vec<String>,
    pub events: Vec<ChainEvent>,
}

#[async_trait]
pub trait BlockchainAdapter: Send + Sync {
    async fn get_height(&self) -> Result<u64, EngineError>;
    async fn submit_transaction(&self, bytes: &[u8]) -> Result<SubmitResult, EngineError>;
    async fn get_receipt(&self, hash: &str) -> Result<Option<TransactionReceipt>, EngineError>;
    async fn invoke_read_only(&self, contract_hash: &str, method: &str) -> Result<serde_json::Value, EngineError>;
    fn subscribe_blocks(&self) -> watch::Receiver<BlockEvent>;
    async fn health_check(&self) -> Result<(), EngineError>;
}

/// Deterministic in-memory adapter: every submission "confirms" once the
/// height advances far enough, and hashes are derived from the submitted
/// bytes so resubmission of identical bytes is recognised as idempotent.
pub struct MockBlockchainAdapter {
    height: AtomicU64,
    receipts: Mutex<HashMap<String, TransactionReceipt>>,
    submissions: Mutex<HashMap<String, u64>>,
    blocks_tx: watch::Sender<BlockEvent>,
    pending_events: Mutex<Vec<ChainEvent>>,
}

impl MockBlockchainAdapter {
    pub fn new() -> Arc<Self> {
        let (blocks_tx, _) = watch::channel(BlockEvent::default());
        Arc::new(Self {
            height: AtomicU64::new(0),
            receipts: Mutex::new(HashMap::new()),
            submissions: Mutex::new(HashMap::new()),
            blocks_tx,
            pending_events: Mutex::new(Vec::new()),
        })
    }

    /// Test/demo driver: queues an event to be emitted in the next mined
    /// block, for exercising `blockchain-event` triggers without a real node.
    pub async fn queue_event(&self, event: ChainEvent) {
        self.pending_events.lock().await.push(event);
    }

    /// Test/demo driver: removes a hash from the submission/receipt tables
    /// so the next `mine_block` omits it from `confirmed_hashes`, simulating
    /// a reorg that drops a previously-confirmed transaction.
    pub async fn drop_confirmation(&self, hash: &str) {
        self.submissions.lock().await.remove(hash);
        self.receipts.lock().await.remove(hash);
    }

    /// Test/demo driver: advances the chain by one block and confirms any
    /// submission at least `confirmations` blocks old.
    pub async fn mine_block(&self) {
        let height = self.height.fetch_add(1, Ordering::SeqCst) + 1;
        let mut receipts = self.receipts.lock().await;
        let submissions = self.submissions.lock().await;
        let mut confirmed_hashes = Vec::new();
        for (hash, submitted_at) in submissions.iter() {
            let confirmations = height.saturating_sub(*submitted_at);
            receipts.insert(
                hash.clone(),
                TransactionReceipt {
                    hash: hash.clone(),
                    confirmations,
                    block_height: *submitted_at,
                    block_time: height,
                    gas_consumed: 1_000_000,
                },
            );
            confirmed_hashes.push(hash.clone());
        }
        let events = std::mem::take(&mut *self.pending_events.lock().await);
        let _ = self.blocks_tx.send(BlockEvent { height, confirmed_hashes, events });
    }
}

fn hash_of(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

#[async_trait]
impl BlockchainAdapter for MockBlockchainAdapter {
    async fn get_height(&self) -> Result<u64, EngineError> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn submit_transaction(&self, bytes: &[u8]) -> Result<SubmitResult, EngineError> {
        let hash = hash_of(bytes);
        let mut submissions = self.submissions.lock().await;
        let already_known = submissions.contains_key(&hash);
        if !already_known {
            let height = self.height.load(Ordering::SeqCst);
            submissions.insert(hash.clone(), height);
        }
        Ok(SubmitResult { hash, already_known })
    }

    async fn get_receipt(&self, hash: &str) -> Result<Option<TransactionReceipt>, EngineError> {
        Ok(self.receipts.lock().await.get(hash).cloned())
    }

    async fn invoke_read_only(&self, _contract_hash: &str, _method: &str) -> Result<serde_json::Value, EngineError> {
        Ok(serde_json::Value::Null)
    }

    fn subscribe_blocks(&self) -> watch::Receiver<BlockEvent> {
        self.blocks_tx.subscribe()
    }

    async fn health_check(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resubmitting_identical_bytes_is_idempotent() {
        let adapter = MockBlockchainAdapter::new();
        let first = adapter.submit_transaction(b"payload").await.unwrap();
        assert!(!first.already_known);
        let second = adapter.submit_transaction(b"payload").await.unwrap();
        assert!(second.already_known);
        assert_eq!(first.hash, second.hash);
    }

    #[tokio::test]
    async fn mining_confirms_submitted_transactions() {
        let adapter = MockBlockchainAdapter::new();
        let submitted = adapter.submit_transaction(b"payload").await.unwrap();
        adapter.mine_block().await;
        let receipt = adapter.get_receipt(&submitted.hash).await.unwrap().unwrap();
        assert_eq!(receipt.confirmations, 1);
    }
}
