//! Neo N3 off-chain service layer engine: transaction manager, oracle
//! request processor, price-feed engine, automation trigger engine,
//! gas-bank ledger, and TEE/secret-store coordinator.

#[macro_use]
extern crate log;

pub mod automation;
pub mod blockchain;
pub mod dispatcher;
pub mod ledger;
pub mod net;
pub mod oracle;
pub mod pricefeed;
pub mod secrets;
pub mod tee;
pub mod transaction;
