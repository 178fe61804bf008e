//! Entities from the data model: plain structs and the typed enums that
//! replace the untyped `map[string]any` payloads (auth methods, trigger
//! configs, action kinds) per the redesign notes.

mod ledger;
mod oracle;
mod pricefeed;
mod secret;
mod transaction;
mod trigger;

pub use ledger::{GasAccount, LedgerEntry, LedgerEntryKind, LedgerEntryStatus};
pub use oracle::{ApiKeyLocation, AuthMethod, OracleRequest, OracleRequestStatus, OracleSource};
pub use pricefeed::{PriceDatum, PriceFeed, PriceSource};
pub use secret::Secret;
pub use transaction::{
    ManagedTransaction, Priority, Signer, TransactionEvent, TransactionEventKind,
    TransactionStatus, TransactionType,
};
pub use trigger::{
    ActionKind, EventFilterPredicate, OnPersistentFailure, PriceCondition, RetryPolicy,
    TriggerConfig, TriggerEvent, TriggerEventStatus, TriggerKind, TriggerRecord, TriggerStatus,
};

use serde::{Deserialize, Serialize};

use crate::ids::{UserAccountId, WalletId};

/// Opaque identity, owning a set of wallets and a ledger balance cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserAccountId,
    pub wallets: Vec<WalletId>,
    pub created: crate::time::TimestampSeconds,
}

/// `(service-name, address, public-key, encrypted-private-key)`. Private key
/// plaintext never leaves the TEE once unwrapped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub service_name: String,
    pub address: String,
    pub public_key: Vec<u8>,
    pub encrypted_private_key: Vec<u8>,
}
