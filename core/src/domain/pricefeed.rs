use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::oracle::AuthMethod;
use crate::ids::PriceFeedId;
use crate::time::TimestampSeconds;

/// A per-feed fetch strategy. `Http` reuses the oracle processor's
/// HTTP+auth+extraction machinery rather than duplicating it — price
/// sources and oracle sources are distinct entities but share the fetch
/// mechanics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PriceSource {
    Http {
        name: String,
        url: String,
        extraction_path: String,
        auth: AuthMethod,
        /// Reserved for future weighted aggregation; the reference
        /// aggregator ignores this (spec.md §9).
        weight: u32,
    },
}

impl PriceSource {
    pub fn name(&self) -> &str {
        match self {
            PriceSource::Http { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFeed {
    pub id: PriceFeedId,
    pub base: String,
    pub quote: String,
    pub pair: String,
    pub update_interval_secs: u64,
    pub deviation_bps_threshold: u32,
    pub heartbeat_interval_secs: u64,
    pub on_chain_contract: String,
    pub active: bool,
    pub sources: Vec<PriceSource>,
    pub last_round_id: u64,
    pub last_published_price: Option<Decimal>,
    pub last_published_time: Option<TimestampSeconds>,
    pub in_flight_round: bool,
}

/// Immutable once written; a `PriceFeed` aggregates its history by feed-id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceDatum {
    pub feed_id: PriceFeedId,
    pub price: Decimal,
    pub timestamp: TimestampSeconds,
    pub round_id: u64,
    pub on_chain_tx_hash: Option<String>,
    pub composite_source_tag: String,
}
