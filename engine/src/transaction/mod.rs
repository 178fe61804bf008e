//! Transaction lifecycle manager: build -> persist -> sign-in-TEE ->
//! broadcast -> confirm -> notify (spec.md §4.1).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use service_core::amount::Amount;
use service_core::backoff::delay_for_attempt;
use service_core::domain::{
    LedgerEntryKind, ManagedTransaction, Priority, Signer, TransactionEvent, TransactionEventKind,
    TransactionStatus, TransactionType,
};
use service_core::error::EngineError;
use service_core::ids::TransactionId;
use service_core::time::get_current_time_in_seconds;
use tokio::sync::{watch, Mutex};
use tokio::time::interval;

use crate::blockchain::BlockchainAdapter;
use crate::dispatcher::TransactionHookRegistry;
use crate::ledger::LedgerRepository;
use crate::tee::{TeeCoordinator, TeeOperation};

/// Maps the service that created a transaction to the ledger entry kind
/// recorded when its fee reservation is committed (spec.md §4.6).
fn ledger_kind_for_service(service: &str) -> LedgerEntryKind {
    match service {
        "oracle" => LedgerEntryKind::SpendOracle,
        "pricefeed" => LedgerEntryKind::SpendPricefeed,
        "automation" => LedgerEntryKind::SpendAutomation,
        _ => LedgerEntryKind::SpendTransaction,
    }
}

#[derive(Debug, Clone)]
pub struct CreateTransactionRequest {
    pub service: String,
    pub entity_id: String,
    pub entity_type: String,
    pub tx_type: TransactionType,
    pub script_bytes: Vec<u8>,
    pub signers: Vec<Signer>,
    pub priority: Priority,
    pub network_fee: Amount,
    pub valid_until_block: Option<u64>,
}

fn validate(req: &CreateTransactionRequest) -> Result<(), EngineError> {
    if req.script_bytes.is_empty() {
        return Err(EngineError::Validation("script_bytes must not be empty".into()));
    }
    if req.signers.is_empty() {
        return Err(EngineError::Validation("at least one signer is required".into()));
    }
    for signer in &req.signers {
        if signer.account.is_empty() || signer.scopes.is_empty() {
            return Err(EngineError::Validation("signer account/scopes must not be empty".into()));
        }
    }
    Ok(())
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, tx: ManagedTransaction) -> Result<(), EngineError>;
    async fn get(&self, id: TransactionId) -> Result<Option<ManagedTransaction>, EngineError>;
    async fn list(&self, service: &str, entity_id: Option<&str>) -> Result<Vec<ManagedTransaction>, EngineError>;
    /// Claims the highest-priority, oldest eligible `created` transaction
    /// not currently claimed (or whose claim has expired), by setting
    /// `claimed_by`/`claim_expires_at`.
    async fn claim_next(&self, worker: &str, now: u64, claim_ttl_secs: u64) -> Result<Option<ManagedTransaction>, EngineError>;
    async fn update(&self, tx: ManagedTransaction) -> Result<(), EngineError>;
    async fn append_event(&self, event: TransactionEvent) -> Result<(), EngineError>;
    async fn events(&self, id: TransactionId) -> Result<Vec<TransactionEvent>, EngineError>;
    /// Non-terminal transactions, re-subscribed to on restart (spec.md §7).
    async fn non_terminal(&self) -> Result<Vec<ManagedTransaction>, EngineError>;
}

#[derive(Default)]
struct Store {
    transactions: HashMap<TransactionId, ManagedTransaction>,
    events: HashMap<TransactionId, Vec<TransactionEvent>>,
}

pub struct InMemoryTransactionRepository {
    store: Mutex<Store>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(Store::default()),
        })
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert(&self, tx: ManagedTransaction) -> Result<(), EngineError> {
        let mut store = self.store.lock().await;
        store.transactions.insert(tx.id, tx);
        Ok(())
    }

    async fn get(&self, id: TransactionId) -> Result<Option<ManagedTransaction>, EngineError> {
        Ok(self.store.lock().await.transactions.get(&id).cloned())
    }

    async fn list(&self, service: &str, entity_id: Option<&str>) -> Result<Vec<ManagedTransaction>, EngineError> {
        let store = self.store.lock().await;
        Ok(store
            .transactions
            .values()
            .filter(|tx| tx.service == service && entity_id.map(|e| e == tx.entity_id).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn claim_next(&self, worker: &str, now: u64, claim_ttl_secs: u64) -> Result<Option<ManagedTransaction>, EngineError> {
        let mut store = self.store.lock().await;
        let mut candidates: Vec<_> = store
            .transactions
            .values()
            .filter(|tx| {
                tx.status == TransactionStatus::Created
                    && tx.claimed_by.as_ref().map(|_| tx.claim_expires_at.unwrap_or(0) <= now).unwrap_or(true)
            })
            .map(|tx| tx.id)
            .collect();
        candidates.sort_by_key(|id| {
            let tx = &store.transactions[id];
            (std::cmp::Reverse(priority_rank(tx.priority)), tx.created)
        });
        let Some(id) = candidates.into_iter().next() else {
            return Ok(None);
        };
        let tx = store.transactions.get_mut(&id).expect("candidate id exists");
        tx.claimed_by = Some(worker.to_owned());
        tx.claim_expires_at = Some(now + claim_ttl_secs);
        Ok(Some(tx.clone()))
    }

    async fn update(&self, tx: ManagedTransaction) -> Result<(), EngineError> {
        let mut store = self.store.lock().await;
        store.transactions.insert(tx.id, tx);
        Ok(())
    }

    async fn append_event(&self, event: TransactionEvent) -> Result<(), EngineError> {
        let mut store = self.store.lock().await;
        store.events.entry(event.transaction_id).or_default().push(event);
        Ok(())
    }

    async fn events(&self, id: TransactionId) -> Result<Vec<TransactionEvent>, EngineError> {
        Ok(self.store.lock().await.events.get(&id).cloned().unwrap_or_default())
    }

    async fn non_terminal(&self) -> Result<Vec<ManagedTransaction>, EngineError> {
        let store = self.store.lock().await;
        Ok(store.transactions.values().filter(|tx| !tx.is_terminal()).cloned().collect())
    }
}

fn priority_rank(p: Priority) -> u8 {
    match p {
        Priority::Low => 0,
        Priority::Normal => 1,
        Priority::High => 2,
    }
}

pub struct TransactionManagerConfig {
    pub workers: usize,
    pub claim_ttl_secs: u64,
    pub confirmations_required: u64,
    pub confirmation_poll_interval: Duration,
    pub max_broadcast_attempts: usize,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            workers: service_core::config::DEFAULT_TX_WORKERS,
            claim_ttl_secs: 30,
            confirmations_required: service_core::config::DEFAULT_CONFIRMATIONS_REQUIRED,
            confirmation_poll_interval: Duration::from_secs(service_core::config::DEFAULT_CONFIRMATION_POLL_INTERVAL_SECS),
            max_broadcast_attempts: 5,
        }
    }
}

/// Owns the worker pool and the confirmation watcher. `create` validates
/// and persists synchronously; signing/broadcast happen in the background.
pub struct TransactionManager {
    repo: Arc<dyn TransactionRepository>,
    ledger: Arc<dyn LedgerRepository>,
    tee: Arc<dyn TeeCoordinator>,
    adapter: Arc<dyn BlockchainAdapter>,
    hooks: Arc<TransactionHookRegistry>,
    config: TransactionManagerConfig,
    shutdown: watch::Sender<bool>,
    /// hash -> transaction id, populated on successful broadcast so the
    /// reorg watcher can map a vanished `confirmed_hashes` entry back to
    /// the managed transaction it belongs to.
    hash_index: Mutex<HashMap<String, TransactionId>>,
    /// Hashes seen at least once in a `BlockEvent.confirmed_hashes`, so the
    /// reorg watcher only flags a hash that was actually confirmed before
    /// it disappears, not one that simply hasn't confirmed yet.
    confirmed_once: Mutex<HashSet<String>>,
}

impl TransactionManager {
    pub fn new(
        repo: Arc<dyn TransactionRepository>,
        ledger: Arc<dyn LedgerRepository>,
        tee: Arc<dyn TeeCoordinator>,
        adapter: Arc<dyn BlockchainAdapter>,
        hooks: Arc<TransactionHookRegistry>,
        config: TransactionManagerConfig,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            repo,
            ledger,
            tee,
            adapter,
            hooks,
            config,
            shutdown,
            hash_index: Mutex::new(HashMap::new()),
            confirmed_once: Mutex::new(HashSet::new()),
        })
    }

    pub async fn create_transaction(
        &self,
        req: CreateTransactionRequest,
        gas_account: service_core::ids::GasAccountId,
    ) -> Result<TransactionId, EngineError> {
        validate(&req)?;
        self.ledger.reserve(gas_account, req.network_fee).await?;

        let now = get_current_time_in_seconds();
        let id = TransactionId::new();
        let tx = ManagedTransaction {
            id,
            service: req.service,
            entity_id: req.entity_id,
            entity_type: req.entity_type,
            tx_type: req.tx_type,
            script_bytes: req.script_bytes,
            signers: req.signers,
            priority: req.priority,
            status: TransactionStatus::Created,
            gas_account,
            network_fee: req.network_fee,
            hash: None,
            gas_consumed: None,
            block_height: None,
            block_time: None,
            error: None,
            valid_until_block: req.valid_until_block,
            claimed_by: None,
            claim_expires_at: None,
            created: now,
            updated: now,
            result_payload: None,
        };
        self.repo.insert(tx).await?;
        self.repo
            .append_event(TransactionEvent {
                transaction_id: id,
                kind: TransactionEventKind::Created,
                timestamp: now,
                detail: None,
            })
            .await?;
        metrics::counter!("service_engine_transactions_created").increment(1);
        Ok(id)
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Option<ManagedTransaction>, EngineError> {
        self.repo.get(id).await
    }

    pub async fn list_transactions(&self, service: &str, entity_id: Option<&str>) -> Result<Vec<ManagedTransaction>, EngineError> {
        self.repo.list(service, entity_id).await
    }

    /// Spawns the fixed worker pool plus the confirmation watcher. Returns
    /// immediately; tasks run until the shutdown signal fires.
    pub fn spawn(self: &Arc<Self>) {
        for worker_id in 0..self.config.workers {
            let manager = self.clone();
            tokio::spawn(async move { manager.run_worker(format!("tx-worker-{worker_id}")).await });
        }
        let manager = self.clone();
        tokio::spawn(async move { manager.run_confirmation_watcher().await });
        let manager = self.clone();
        tokio::spawn(async move { manager.run_reorg_watcher().await });
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn run_worker(self: Arc<Self>, worker_id: String) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => if *shutdown.borrow() { return },
                claimed = self.repo.claim_next(&worker_id, get_current_time_in_seconds(), self.config.claim_ttl_secs) => {
                    match claimed {
                        Ok(Some(tx)) => self.process_claimed(tx).await,
                        Ok(None) => tokio::time::sleep(Duration::from_millis(200)).await,
                        Err(err) => warn!("claim_next failed: {err}"),
                    }
                }
            }
        }
    }

    async fn process_claimed(&self, mut tx: ManagedTransaction) {
        let now = get_current_time_in_seconds();
        tx.status = TransactionStatus::Signing;
        tx.updated = now;
        if let Err(err) = self.repo.update(tx.clone()).await {
            warn!("failed to persist signing transition: {err}");
            return;
        }
        let _ = self
            .repo
            .append_event(TransactionEvent {
                transaction_id: tx.id,
                kind: TransactionEventKind::Signed,
                timestamp: now,
                detail: None,
            })
            .await;

        let signed = self
            .tee
            .run(
                TeeOperation {
                    name: "sign-transaction".into(),
                    payload: serde_json::json!({ "script_bytes": hex::encode(&tx.script_bytes) }),
                    secret_refs: vec![],
                },
                Duration::from_secs(30),
            )
            .await;

        let signed_bytes = match signed {
            Ok(out) => out.result.to_string().into_bytes(),
            Err(err) => {
                self.fail_transaction(tx, err.to_string()).await;
                return;
            }
        };

        self.broadcast_with_retry(tx, signed_bytes).await;
    }

    async fn broadcast_with_retry(&self, mut tx: ManagedTransaction, signed_bytes: Vec<u8>) {
        for attempt in 0..self.config.max_broadcast_attempts {
            match self.adapter.submit_transaction(&signed_bytes).await {
                Ok(result) => {
                    let now = get_current_time_in_seconds();
                    tx.status = TransactionStatus::Broadcast;
                    tx.hash = Some(result.hash.clone());
                    tx.updated = now;
                    self.hash_index.lock().await.insert(result.hash, tx.id);
                    let _ = self.repo.update(tx.clone()).await;
                    let _ = self
                        .repo
                        .append_event(TransactionEvent {
                            transaction_id: tx.id,
                            kind: TransactionEventKind::Broadcast,
                            timestamp: now,
                            detail: None,
                        })
                        .await;
                    metrics::counter!("service_engine_transactions_broadcast").increment(1);
                    return;
                }
                Err(err) if err.is_retryable() && attempt + 1 < self.config.max_broadcast_attempts => {
                    tokio::time::sleep(delay_for_attempt(attempt)).await;
                }
                Err(err) => {
                    self.fail_transaction(tx, err.to_string()).await;
                    return;
                }
            }
        }
    }

    async fn fail_transaction(&self, mut tx: ManagedTransaction, error: String) {
        let now = get_current_time_in_seconds();
        tx.status = TransactionStatus::Failed;
        tx.error = Some(error.clone());
        tx.updated = now;
        if let Err(err) = self.ledger.release_reservation(tx.gas_account, tx.network_fee).await {
            warn!("failed to release fee reservation for {}: {err}", tx.id);
        }
        let _ = self.repo.update(tx.clone()).await;
        let _ = self
            .repo
            .append_event(TransactionEvent {
                transaction_id: tx.id,
                kind: TransactionEventKind::Failed,
                timestamp: now,
                detail: Some(error),
            })
            .await;
        self.hooks
            .dispatch(&tx.service, &tx.entity_type, tx.id, TransactionStatus::Failed)
            .await;
        metrics::counter!("service_engine_transactions_failed").increment(1);
    }

    async fn run_confirmation_watcher(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = interval(self.config.confirmation_poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => if *shutdown.borrow() { return },
                _ = ticker.tick() => self.poll_confirmations().await,
            }
        }
    }

    async fn poll_confirmations(&self) {
        let Ok(pending) = self.repo.non_terminal().await else { return };
        for tx in pending {
            if tx.status != TransactionStatus::Broadcast {
                continue;
            }
            let Some(hash) = tx.hash.clone() else { continue };
            let Ok(Some(receipt)) = self.adapter.get_receipt(&hash).await else { continue };

            let mut tx = tx;
            let now = get_current_time_in_seconds();
            if receipt.confirmations >= self.config.confirmations_required {
                tx.status = TransactionStatus::Confirmed;
                tx.gas_consumed = Some(receipt.gas_consumed);
                tx.block_height = Some(receipt.block_height);
                tx.block_time = Some(receipt.block_time);
                tx.updated = now;
                if let Err(err) = self
                    .ledger
                    .commit_reservation(tx.gas_account, tx.network_fee, tx.network_fee, ledger_kind_for_service(&tx.service))
                    .await
                {
                    warn!("failed to commit fee reservation for {}: {err}", tx.id);
                }
                let _ = self.repo.update(tx.clone()).await;
                let _ = self
                    .repo
                    .append_event(TransactionEvent {
                        transaction_id: tx.id,
                        kind: TransactionEventKind::Confirmed,
                        timestamp: now,
                        detail: None,
                    })
                    .await;
                self.hooks
                    .dispatch(&tx.service, &tx.entity_type, tx.id, TransactionStatus::Confirmed)
                    .await;
                metrics::counter!("service_engine_transactions_confirmed").increment(1);
            } else if let Some(valid_until) = tx.valid_until_block {
                if receipt.block_height > valid_until {
                    tx.status = TransactionStatus::Expired;
                    tx.updated = now;
                    if let Err(err) = self.ledger.release_reservation(tx.gas_account, tx.network_fee).await {
                        warn!("failed to release fee reservation for {}: {err}", tx.id);
                    }
                    let _ = self.repo.update(tx.clone()).await;
                    let _ = self
                        .repo
                        .append_event(TransactionEvent {
                            transaction_id: tx.id,
                            kind: TransactionEventKind::Expired,
                            timestamp: now,
                            detail: None,
                        })
                        .await;
                }
            }
        }
    }

    /// Subscribes to the adapter's block stream and watches for a
    /// previously-confirmed hash disappearing from `confirmed_hashes`
    /// (spec.md §4.1: "a previously seen transaction disappears from the
    /// canonical chain"). Separate from the poll-based confirmation watcher
    /// because it must also react on `confirmed` transactions, which
    /// `poll_confirmations` no longer sees once they're terminal.
    async fn run_reorg_watcher(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut blocks = self.adapter.subscribe_blocks();
        loop {
            tokio::select! {
                _ = shutdown.changed() => if *shutdown.borrow() { return },
                changed = blocks.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let event = blocks.borrow_and_update().clone();
                    self.handle_block_for_reorgs(event).await;
                }
            }
        }
    }

    async fn handle_block_for_reorgs(&self, event: crate::blockchain::BlockEvent) {
        let current: HashSet<String> = event.confirmed_hashes.into_iter().collect();
        let mut confirmed_once = self.confirmed_once.lock().await;
        let vanished: Vec<String> = confirmed_once.difference(&current).cloned().collect();
        for hash in &vanished {
            confirmed_once.remove(hash);
        }
        confirmed_once.extend(current);
        drop(confirmed_once);

        for hash in vanished {
            let Some(id) = self.hash_index.lock().await.get(&hash).copied() else { continue };
            let Ok(Some(mut tx)) = self.repo.get(id).await else { continue };
            if !matches!(tx.status, TransactionStatus::Broadcast | TransactionStatus::Confirmed) {
                continue;
            }
            let now = get_current_time_in_seconds();
            tx.status = TransactionStatus::Broadcast;
            tx.updated = now;
            let _ = self.repo.update(tx.clone()).await;
            let _ = self
                .repo
                .append_event(TransactionEvent {
                    transaction_id: tx.id,
                    kind: TransactionEventKind::Reorged,
                    timestamp: now,
                    detail: None,
                })
                .await;
            metrics::counter!("service_engine_transactions_reorged").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::MockBlockchainAdapter;
    use crate::ledger::InMemoryLedger;
    use crate::secrets::LocalSecretStore;
    use crate::tee::LocalTeeCoordinator;
    use service_core::ids::UserAccountId;

    async fn sample_manager() -> (Arc<TransactionManager>, Arc<InMemoryLedger>, service_core::ids::GasAccountId, Arc<MockBlockchainAdapter>) {
        let repo = InMemoryTransactionRepository::new();
        let ledger = InMemoryLedger::new();
        let account = ledger.open_account(UserAccountId::new(), "Nb1".into()).await;
        ledger.credit(account, Amount::from_raw(1_000_000_000)).await.unwrap();
        let tee = LocalTeeCoordinator::new(LocalSecretStore::new());
        let adapter = MockBlockchainAdapter::new();
        let hooks = TransactionHookRegistry::new();
        let manager = TransactionManager::new(repo, ledger.clone(), tee, adapter.clone(), hooks, TransactionManagerConfig::default());
        (manager, ledger, account, adapter)
    }

    #[tokio::test]
    async fn create_transaction_rejects_empty_script() {
        let (manager, _ledger, account, _adapter) = sample_manager().await;
        let req = CreateTransactionRequest {
            service: "user-7".into(),
            entity_id: "e1".into(),
            entity_type: "user-initiated".into(),
            tx_type: TransactionType::Invoke,
            script_bytes: vec![],
            signers: vec![Signer { account: "Nb1".into(), scopes: "CalledByEntry".into() }],
            priority: Priority::Normal,
            network_fee: Amount::from_raw(1),
            valid_until_block: None,
        };
        let err = manager.create_transaction(req, account).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn create_transaction_reserves_fee_and_reaches_broadcast() {
        let (manager, _ledger, account, adapter) = sample_manager().await;
        let req = CreateTransactionRequest {
            service: "user-7".into(),
            entity_id: "e1".into(),
            entity_type: "user-initiated".into(),
            tx_type: TransactionType::Invoke,
            script_bytes: vec![1, 2, 3],
            signers: vec![Signer { account: "Nb1".into(), scopes: "CalledByEntry".into() }],
            priority: Priority::Normal,
            network_fee: Amount::from_raw(100_000_000),
            valid_until_block: None,
        };
        let id = manager.create_transaction(req, account).await.unwrap();
        manager.spawn();

        let mut tx = manager.get_transaction(id).await.unwrap().unwrap();
        for _ in 0..50 {
            if tx.status == TransactionStatus::Broadcast {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx = manager.get_transaction(id).await.unwrap().unwrap();
        }
        assert_eq!(tx.status, TransactionStatus::Broadcast);
        assert!(tx.hash.is_some());
        manager.shutdown();
        let _ = adapter;
    }

    async fn sample_manager_single_confirmation() -> (Arc<TransactionManager>, Arc<InMemoryLedger>, service_core::ids::GasAccountId, Arc<MockBlockchainAdapter>) {
        let repo = InMemoryTransactionRepository::new();
        let ledger = InMemoryLedger::new();
        let account = ledger.open_account(UserAccountId::new(), "Nb1".into()).await;
        ledger.credit(account, Amount::from_raw(1_000_000_000)).await.unwrap();
        let tee = LocalTeeCoordinator::new(LocalSecretStore::new());
        let adapter = MockBlockchainAdapter::new();
        let hooks = TransactionHookRegistry::new();
        let config = TransactionManagerConfig {
            confirmations_required: 1,
            confirmation_poll_interval: Duration::from_millis(10),
            ..TransactionManagerConfig::default()
        };
        let manager = TransactionManager::new(repo, ledger.clone(), tee, adapter.clone(), hooks, config);
        (manager, ledger, account, adapter)
    }

    #[tokio::test]
    async fn confirmed_transaction_commits_fee_reservation() {
        let (manager, ledger, account, adapter) = sample_manager_single_confirmation().await;
        let req = CreateTransactionRequest {
            service: "user-7".into(),
            entity_id: "e1".into(),
            entity_type: "user-initiated".into(),
            tx_type: TransactionType::Invoke,
            script_bytes: vec![1, 2, 3],
            signers: vec![Signer { account: "Nb1".into(), scopes: "CalledByEntry".into() }],
            priority: Priority::Normal,
            network_fee: Amount::from_raw(100_000_000),
            valid_until_block: None,
        };
        let id = manager.create_transaction(req, account).await.unwrap();
        manager.spawn();

        let mut tx = manager.get_transaction(id).await.unwrap().unwrap();
        for _ in 0..50 {
            if tx.status == TransactionStatus::Confirmed {
                break;
            }
            adapter.mine_block().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx = manager.get_transaction(id).await.unwrap().unwrap();
        }
        assert_eq!(tx.status, TransactionStatus::Confirmed);
        assert_eq!(ledger.balance(account).await.unwrap().raw(), 900_000_000);
        manager.shutdown();
    }

    #[tokio::test]
    async fn fail_transaction_releases_fee_reservation() {
        let (manager, ledger, account, _adapter) = sample_manager_single_confirmation().await;
        let req = CreateTransactionRequest {
            service: "user-7".into(),
            entity_id: "e1".into(),
            entity_type: "user-initiated".into(),
            tx_type: TransactionType::Invoke,
            script_bytes: vec![1, 2, 3],
            signers: vec![Signer { account: "Nb1".into(), scopes: "CalledByEntry".into() }],
            priority: Priority::Normal,
            network_fee: Amount::from_raw(100_000_000),
            valid_until_block: None,
        };
        let id = manager.create_transaction(req, account).await.unwrap();
        let tx = manager.get_transaction(id).await.unwrap().unwrap();
        manager.fail_transaction(tx, "boom".into()).await;

        assert_eq!(ledger.balance(account).await.unwrap().raw(), 1_000_000_000);
        let err = ledger.reserve(account, Amount::from_raw(1_000_000_000)).await;
        assert!(err.is_ok(), "reservation should have been fully released");
    }

    #[tokio::test]
    async fn reorg_reverts_confirmed_transaction_to_broadcast() {
        let (manager, _ledger, account, adapter) = sample_manager_single_confirmation().await;
        let req = CreateTransactionRequest {
            service: "user-7".into(),
            entity_id: "e1".into(),
            entity_type: "user-initiated".into(),
            tx_type: TransactionType::Invoke,
            script_bytes: vec![1, 2, 3],
            signers: vec![Signer { account: "Nb1".into(), scopes: "CalledByEntry".into() }],
            priority: Priority::Normal,
            network_fee: Amount::from_raw(100_000_000),
            valid_until_block: None,
        };
        let id = manager.create_transaction(req, account).await.unwrap();
        manager.spawn();

        let mut tx = manager.get_transaction(id).await.unwrap().unwrap();
        for _ in 0..50 {
            if tx.status == TransactionStatus::Confirmed {
                break;
            }
            adapter.mine_block().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx = manager.get_transaction(id).await.unwrap().unwrap();
        }
        assert_eq!(tx.status, TransactionStatus::Confirmed);
        let hash = tx.hash.clone().unwrap();

        adapter.drop_confirmation(&hash).await;
        adapter.mine_block().await;

        let mut reverted = manager.get_transaction(id).await.unwrap().unwrap();
        for _ in 0..50 {
            if reverted.status == TransactionStatus::Broadcast {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            reverted = manager.get_transaction(id).await.unwrap().unwrap();
        }
        assert_eq!(reverted.status, TransactionStatus::Broadcast);
        let events = manager.repo.events(id).await.unwrap();
        assert!(events.iter().any(|e| e.kind == TransactionEventKind::Reorged));
        manager.shutdown();
    }
}
