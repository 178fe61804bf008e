use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::ids::{GasAccountId, LedgerEntryId, UserAccountId};
use crate::time::TimestampSeconds;

/// `(user, address, balance)`. Invariant: balance = Σ(credits) − Σ(debits)
/// for this (user, address) pair, enforced by the ledger repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasAccount {
    pub id: GasAccountId,
    pub user: UserAccountId,
    pub address: String,
    pub balance: Amount,
    pub reserved: Amount,
}

impl GasAccount {
    pub fn available(&self) -> Amount {
        self.balance.checked_sub(self.reserved).unwrap_or(Amount::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerEntryKind {
    Deposit,
    Withdraw,
    SpendOracle,
    SpendPricefeed,
    SpendAutomation,
    SpendTransaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerEntryStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Append-only journal row. Every mutating ledger operation writes exactly
/// one of these, or none at all on failure — no partial writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub user: UserAccountId,
    pub account: GasAccountId,
    pub kind: LedgerEntryKind,
    pub amount: Amount,
    pub on_chain_tx_hash: Option<String>,
    pub status: LedgerEntryStatus,
    pub timestamp: TimestampSeconds,
}
