//! Process entrypoint: parses [`EngineConfig`], wires the ledger, secret
//! store, TEE coordinator, blockchain adapter, transaction manager, oracle
//! processor, price-feed engine, and automation engine together, then
//! blocks until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::info;
use service_core::config::EngineConfig;
use service_core::domain::Signer;
use service_core::ids::UserAccountId;
use service_core::logging::init_logging;
use service_engine::automation::{AutomationEngine, InMemoryTriggerRepository};
use service_engine::blockchain::MockBlockchainAdapter;
use service_engine::dispatcher::TransactionHookRegistry;
use service_engine::ledger::InMemoryLedger;
use service_engine::oracle::{InMemoryOracleRequestRepository, OracleProcessor};
use service_engine::pricefeed::{InMemoryPriceFeedRepository, PriceFeedEngine, PriceFeedEngineConfig};
use service_engine::secrets::LocalSecretStore;
use service_engine::tee::LocalTeeCoordinator;
use service_engine::transaction::{InMemoryTransactionRepository, TransactionManager, TransactionManagerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::parse();

    if config.generate_config_template {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    init_logging(&config.log).context("failed to initialise logging")?;
    info!("starting service-engine {}", service_core::config::VERSION);

    let ledger = InMemoryLedger::new();
    let secrets = LocalSecretStore::new();
    let tee = LocalTeeCoordinator::new(secrets);
    let blockchain = MockBlockchainAdapter::new();
    let hooks = TransactionHookRegistry::new();

    let service_account = ledger
        .open_account(UserAccountId::new(), "service-namespace".to_owned())
        .await;
    let service_signer = Signer { account: "service-namespace".to_owned(), scopes: "CalledByEntry".to_owned() };

    let tx_manager = TransactionManager::new(
        InMemoryTransactionRepository::new(),
        ledger.clone(),
        tee.clone(),
        blockchain.clone(),
        hooks.clone(),
        TransactionManagerConfig {
            workers: config.transaction.tx_workers,
            claim_ttl_secs: 30,
            confirmations_required: config.transaction.confirmations_required,
            confirmation_poll_interval: Duration::from_secs(config.transaction.confirmation_poll_interval_secs),
            max_broadcast_attempts: 5,
        },
    );

    let oracle_signing_key = rand_signing_key();
    let oracle = OracleProcessor::new(
        InMemoryOracleRequestRepository::new(),
        ledger.clone(),
        tx_manager.clone(),
        service_signer.clone(),
        oracle_signing_key,
        Duration::from_secs(config.http.http_timeout_secs),
    );
    {
        let oracle = oracle.clone();
        hooks.register(
            "oracle",
            "oracle-request",
            Arc::new(move |tx_id, status| {
                let oracle = oracle.clone();
                Box::pin(async move { oracle.handle_callback_outcome(tx_id, status).await })
            }),
        );
    }

    let pricefeed = PriceFeedEngine::new(
        InMemoryPriceFeedRepository::new(),
        tx_manager.clone(),
        service_signer.clone(),
        service_account,
        PriceFeedEngineConfig {
            tick_interval: Duration::from_secs(config.pricefeed.pricefeed_tick_secs),
            source_timeout: Duration::from_secs(config.pricefeed.pricefeed_source_timeout_secs),
            channel_capacity: config.pricefeed.pricefeed_channel_capacity,
        },
    );

    let automation = AutomationEngine::new(
        InMemoryTriggerRepository::new(),
        tee.clone(),
        tx_manager.clone(),
        blockchain.clone(),
        pricefeed.clone(),
        service_signer,
        service_account,
        Duration::from_secs(config.automation.automation_tick_secs),
    );

    tx_manager.spawn();
    pricefeed.spawn().await.context("failed to start price-feed scheduler")?;
    automation.spawn();

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, stopping engines");
    tx_manager.shutdown();
    pricefeed.shutdown();
    automation.shutdown();
    Ok(())
}

fn rand_signing_key() -> Vec<u8> {
    use rand::RngCore;
    let mut key = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    key
}
