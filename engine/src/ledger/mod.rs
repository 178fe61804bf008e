//! The gas-bank ledger: per-user accounts, atomic reserve/debit/credit,
//! append-only audit trail. `Reserve` fails fast and writes nothing on
//! failure (spec.md §7 "Ledger operations either fully succeed or leave no
//! trace").

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use service_core::amount::Amount;
use service_core::domain::{GasAccount, LedgerEntry, LedgerEntryKind, LedgerEntryStatus};
use service_core::error::EngineError;
use service_core::ids::{GasAccountId, LedgerEntryId, UserAccountId};
use service_core::time::get_current_time_in_seconds;
use tokio::sync::Mutex;

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn credit(&self, account: GasAccountId, amount: Amount) -> Result<LedgerEntry, EngineError>;
    async fn reserve(&self, account: GasAccountId, amount: Amount) -> Result<(), EngineError>;
    async fn commit_reservation(
        &self,
        account: GasAccountId,
        reserved: Amount,
        actual: Amount,
        kind: LedgerEntryKind,
    ) -> Result<LedgerEntry, EngineError>;
    async fn release_reservation(&self, account: GasAccountId, amount: Amount) -> Result<(), EngineError>;
    async fn debit(&self, account: GasAccountId, amount: Amount, kind: LedgerEntryKind) -> Result<LedgerEntry, EngineError>;
    async fn balance(&self, account: GasAccountId) -> Result<Amount, EngineError>;
}

struct AccountState {
    account: GasAccount,
    entries: Vec<LedgerEntry>,
}

/// Reference implementation behind a per-account `tokio::sync::Mutex`,
/// matching the read-modify-write-under-lock idiom the teacher uses for
/// its own storage-backed repositories.
pub struct InMemoryLedger {
    accounts: Mutex<HashMap<GasAccountId, AccountState>>,
}

impl InMemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            accounts: Mutex::new(HashMap::new()),
        })
    }

    pub async fn open_account(&self, user: UserAccountId, address: String) -> GasAccountId {
        let id = GasAccountId::new();
        let mut accounts = self.accounts.lock().await;
        accounts.insert(
            id,
            AccountState {
                account: GasAccount {
                    id,
                    user,
                    address,
                    balance: Amount::ZERO,
                    reserved: Amount::ZERO,
                },
                entries: Vec::new(),
            },
        );
        id
    }

    fn append_entry(state: &mut AccountState, kind: LedgerEntryKind, amount: Amount, status: LedgerEntryStatus) -> LedgerEntry {
        let entry = LedgerEntry {
            id: LedgerEntryId::new(),
            user: state.account.user,
            account: state.account.id,
            kind,
            amount,
            on_chain_tx_hash: None,
            status,
            timestamp: get_current_time_in_seconds(),
        };
        state.entries.push(entry.clone());
        entry
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedger {
    async fn credit(&self, account: GasAccountId, amount: Amount) -> Result<LedgerEntry, EngineError> {
        let mut accounts = self.accounts.lock().await;
        let state = accounts
            .get_mut(&account)
            .ok_or_else(|| EngineError::NotFound(format!("gas account {account}")))?;
        state.account.balance = state.account.balance.checked_add(amount)?;
        Ok(Self::append_entry(state, LedgerEntryKind::Deposit, amount, LedgerEntryStatus::Pending))
    }

    async fn reserve(&self, account: GasAccountId, amount: Amount) -> Result<(), EngineError> {
        let mut accounts = self.accounts.lock().await;
        let state = accounts
            .get_mut(&account)
            .ok_or_else(|| EngineError::NotFound(format!("gas account {account}")))?;
        let available = state.account.available();
        if available < amount {
            return Err(EngineError::InsufficientFunds {
                need: amount.raw(),
                have: available.raw(),
            });
        }
        state.account.reserved = state.account.reserved.checked_add(amount)?;
        Ok(())
    }

    async fn commit_reservation(
        &self,
        account: GasAccountId,
        reserved: Amount,
        actual: Amount,
        kind: LedgerEntryKind,
    ) -> Result<LedgerEntry, EngineError> {
        let mut accounts = self.accounts.lock().await;
        let state = accounts
            .get_mut(&account)
            .ok_or_else(|| EngineError::NotFound(format!("gas account {account}")))?;
        state.account.reserved = state.account.reserved.checked_sub(reserved)?;
        state.account.balance = state.account.balance.checked_sub(actual)?;
        Ok(Self::append_entry(state, kind, actual, LedgerEntryStatus::Confirmed))
    }

    async fn release_reservation(&self, account: GasAccountId, amount: Amount) -> Result<(), EngineError> {
        let mut accounts = self.accounts.lock().await;
        let state = accounts
            .get_mut(&account)
            .ok_or_else(|| EngineError::NotFound(format!("gas account {account}")))?;
        state.account.reserved = state.account.reserved.checked_sub(amount)?;
        Ok(())
    }

    async fn debit(&self, account: GasAccountId, amount: Amount, kind: LedgerEntryKind) -> Result<LedgerEntry, EngineError> {
        let mut accounts = self.accounts.lock().await;
        let state = accounts
            .get_mut(&account)
            .ok_or_else(|| EngineError::NotFound(format!("gas account {account}")))?;
        state.account.balance = state.account.balance.checked_sub(amount)?;
        Ok(Self::append_entry(state, kind, amount, LedgerEntryStatus::Confirmed))
    }

    async fn balance(&self, account: GasAccountId) -> Result<Amount, EngineError> {
        let accounts = self.accounts.lock().await;
        accounts
            .get(&account)
            .map(|s| s.account.balance)
            .ok_or_else(|| EngineError::NotFound(format!("gas account {account}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_beyond_balance_fails_and_writes_nothing() {
        let ledger = InMemoryLedger::new();
        let account = ledger.open_account(UserAccountId::new(), "Nb1".into()).await;
        ledger.credit(account, Amount::from_raw(100_000_000)).await.unwrap();

        let err = ledger.reserve(account, Amount::from_raw(500_000_000)).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));

        let balance = ledger.balance(account).await.unwrap();
        assert_eq!(balance.raw(), 100_000_000);
    }

    #[tokio::test]
    async fn full_reserve_commit_cycle_updates_balance() {
        let ledger = InMemoryLedger::new();
        let account = ledger.open_account(UserAccountId::new(), "Nb1".into()).await;
        ledger.credit(account, Amount::from_raw(1_000_000_000)).await.unwrap();

        ledger.reserve(account, Amount::from_raw(100_000_000)).await.unwrap();
        ledger
            .commit_reservation(
                account,
                Amount::from_raw(100_000_000),
                Amount::from_raw(80_000_000),
                LedgerEntryKind::SpendTransaction,
            )
            .await
            .unwrap();

        let balance = ledger.balance(account).await.unwrap();
        assert_eq!(balance.raw(), 920_000_000);
    }
}
