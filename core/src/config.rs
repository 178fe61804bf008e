use clap::{Args, Parser};
use serde::{Deserialize, Serialize};

use crate::logging::LogConfig;

pub const VERSION: &str = env!("BUILD_VERSION");

// 8 decimals numbers, matching the precision the chain itself uses for
// native asset amounts. Gas-bank balances and ledger entries are kept in
// this same fixed-point representation so arithmetic never touches floats.
pub const COIN_DECIMALS: u8 = 8;
// 100 000 000 to represent 1 unit of native asset
pub const COIN_VALUE: u64 = 10u64.pow(COIN_DECIMALS as u32);

// Default worker pool sizing for the transaction manager, when not
// overridden on the command line.
pub const DEFAULT_TX_WORKERS: usize = 4;
// How often the transaction manager polls the blockchain adapter for
// confirmations of transactions it is tracking.
pub const DEFAULT_CONFIRMATION_POLL_INTERVAL_SECS: u64 = 5;
// Number of confirmations required before a transaction is considered final.
pub const DEFAULT_CONFIRMATIONS_REQUIRED: u64 = 12;
// Default HTTP timeout for outbound oracle/price-source/webhook requests.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
// Default tick interval for the price-feed scheduler's housekeeping loop.
pub const DEFAULT_PRICEFEED_TICK_SECS: u64 = 1;
// Default tick interval for the automation engine's cron/condition loop.
pub const DEFAULT_AUTOMATION_TICK_SECS: u64 = 1;

/// Top-level configuration for the service engine binary.
///
/// Mirrors the shape of a daemon config: a handful of flattened sub-configs
/// plus a few scalar knobs, all derivable from either the command line or a
/// config file via `clap`/`serde`.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "service-engine", version = VERSION, about = "Neo N3 off-chain service layer engine", styles = crate::get_cli_styles())]
pub struct EngineConfig {
    #[command(flatten)]
    pub log: LogConfig,

    #[command(flatten)]
    pub transaction: TransactionManagerConfig,

    #[command(flatten)]
    pub http: HttpClientConfig,

    #[command(flatten)]
    pub pricefeed: PriceFeedEngineConfig,

    #[command(flatten)]
    pub automation: AutomationEngineConfig,

    /// Path to a config file to load in addition to CLI flags.
    #[clap(long)]
    pub config_file: Option<String>,

    /// Write the effective configuration (with defaults applied) to stdout and exit.
    #[clap(long)]
    pub generate_config_template: bool,
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct TransactionManagerConfig {
    /// Number of concurrent signing/broadcast workers.
    #[clap(long, default_value_t = DEFAULT_TX_WORKERS)]
    pub tx_workers: usize,

    /// Interval, in seconds, between confirmation polls against the blockchain adapter.
    #[clap(long, default_value_t = DEFAULT_CONFIRMATION_POLL_INTERVAL_SECS)]
    pub confirmation_poll_interval_secs: u64,

    /// Confirmations required before a managed transaction is final.
    #[clap(long, default_value_t = DEFAULT_CONFIRMATIONS_REQUIRED)]
    pub confirmations_required: u64,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            tx_workers: DEFAULT_TX_WORKERS,
            confirmation_poll_interval_secs: DEFAULT_CONFIRMATION_POLL_INTERVAL_SECS,
            confirmations_required: DEFAULT_CONFIRMATIONS_REQUIRED,
        }
    }
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Timeout, in seconds, for outbound oracle/price-source/callback requests.
    #[clap(long, default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)]
    pub http_timeout_secs: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct PriceFeedEngineConfig {
    /// Housekeeping tick interval for the price-feed scheduler.
    #[clap(long, default_value_t = DEFAULT_PRICEFEED_TICK_SECS)]
    pub pricefeed_tick_secs: u64,

    /// Per-source fetch timeout, in seconds.
    #[clap(long, default_value_t = 5)]
    pub pricefeed_source_timeout_secs: u64,

    /// Bounded channel capacity for update-trigger fan-out.
    #[clap(long, default_value_t = 64)]
    pub pricefeed_channel_capacity: usize,
}

impl Default for PriceFeedEngineConfig {
    fn default() -> Self {
        Self {
            pricefeed_tick_secs: DEFAULT_PRICEFEED_TICK_SECS,
            pricefeed_source_timeout_secs: 5,
            pricefeed_channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct AutomationEngineConfig {
    /// Tick interval for the cron/price-condition evaluation loop.
    #[clap(long, default_value_t = DEFAULT_AUTOMATION_TICK_SECS)]
    pub automation_tick_secs: u64,
}

impl Default for AutomationEngineConfig {
    fn default() -> Self {
        Self {
            automation_tick_secs: DEFAULT_AUTOMATION_TICK_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_value_matches_decimals() {
        assert_eq!(COIN_VALUE, 100_000_000);
    }

    #[test]
    fn transaction_manager_config_default() {
        let cfg = TransactionManagerConfig::default();
        assert_eq!(cfg.tx_workers, DEFAULT_TX_WORKERS);
        assert_eq!(cfg.confirmations_required, DEFAULT_CONFIRMATIONS_REQUIRED);
    }
}
