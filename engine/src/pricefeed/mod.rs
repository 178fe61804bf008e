//! Price-feed scheduler and aggregator: two timers per feed (update,
//! heartbeat) fan into a bounded channel; workers fetch every active
//! source in parallel, aggregate by weighted median (weights ignored),
//! gate publication on deviation/heartbeat, and publish via the
//! Transaction Manager (spec.md §4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use rust_decimal::Decimal;
use service_core::amount::Amount;
use service_core::domain::{PriceDatum, PriceFeed, PriceSource, Priority, Signer, TransactionType};
use service_core::error::EngineError;
use service_core::ids::PriceFeedId;
use service_core::time::get_current_time_in_seconds;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::interval;

use crate::net::{fetch_json, validate_outbound_url};
use crate::oracle::{apply_auth, extract, parse_body};
use crate::transaction::{CreateTransactionRequest, TransactionManager};

#[async_trait]
pub trait PriceFeedRepository: Send + Sync {
    async fn insert(&self, feed: PriceFeed) -> Result<(), EngineError>;
    async fn get(&self, id: PriceFeedId) -> Result<Option<PriceFeed>, EngineError>;
    async fn list_active(&self) -> Result<Vec<PriceFeed>, EngineError>;
    async fn update(&self, feed: PriceFeed) -> Result<(), EngineError>;
    async fn append_datum(&self, datum: PriceDatum) -> Result<(), EngineError>;
    async fn history(&self, id: PriceFeedId, page: usize, page_size: usize) -> Result<Vec<PriceDatum>, EngineError>;
    async fn latest(&self, id: PriceFeedId) -> Result<Option<PriceDatum>, EngineError>;
}

#[derive(Default)]
struct Store {
    feeds: HashMap<PriceFeedId, PriceFeed>,
    history: HashMap<PriceFeedId, Vec<PriceDatum>>,
}

pub struct InMemoryPriceFeedRepository {
    store: Mutex<Store>,
}

impl InMemoryPriceFeedRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { store: Mutex::new(Store::default()) })
    }
}

#[async_trait]
impl PriceFeedRepository for InMemoryPriceFeedRepository {
    async fn insert(&self, feed: PriceFeed) -> Result<(), EngineError> {
        self.store.lock().await.feeds.insert(feed.id, feed);
        Ok(())
    }

    async fn get(&self, id: PriceFeedId) -> Result<Option<PriceFeed>, EngineError> {
        Ok(self.store.lock().await.feeds.get(&id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<PriceFeed>, EngineError> {
        Ok(self.store.lock().await.feeds.values().filter(|f| f.active).cloned().collect())
    }

    async fn update(&self, feed: PriceFeed) -> Result<(), EngineError> {
        self.store.lock().await.feeds.insert(feed.id, feed);
        Ok(())
    }

    async fn append_datum(&self, datum: PriceDatum) -> Result<(), EngineError> {
        self.store.lock().await.history.entry(datum.feed_id).or_default().push(datum);
        Ok(())
    }

    async fn history(&self, id: PriceFeedId, page: usize, page_size: usize) -> Result<Vec<PriceDatum>, EngineError> {
        let store = self.store.lock().await;
        let Some(entries) = store.history.get(&id) else { return Ok(Vec::new()) };
        Ok(entries.iter().rev().skip(page * page_size).take(page_size).cloned().collect())
    }

    async fn latest(&self, id: PriceFeedId) -> Result<Option<PriceDatum>, EngineError> {
        let store = self.store.lock().await;
        Ok(store.history.get(&id).and_then(|entries| entries.last().cloned()))
    }
}

/// Weighted-median-ignoring-weights aggregation over per-source quotes
/// (spec.md §4.3.2 step 2): two values average; more than two, sort and
/// take the middle (averaging the two centre values on an even count).
/// Weights are accepted on [`PriceSource::Http`] for future expansion but
/// are not consulted here (spec.md §9).
pub fn aggregate(quotes: &[(String, Decimal)]) -> Option<Decimal> {
    if quotes.is_empty() {
        return None;
    }
    let mut values: Vec<Decimal> = quotes.iter().map(|(_, v)| *v).collect();
    values.sort();
    let n = values.len();
    if n == 1 {
        return Some(values[0]);
    }
    if n.is_multiple_of(2) {
        Some((values[n / 2 - 1] + values[n / 2]) / Decimal::from(2))
    } else {
        Some(values[n / 2])
    }
}

fn percent_deviation(previous: Decimal, next: Decimal) -> Decimal {
    if previous.is_zero() {
        return Decimal::MAX;
    }
    ((next - previous) / previous).abs() * Decimal::from(10_000)
}

pub struct PriceFeedEngineConfig {
    pub tick_interval: Duration,
    pub source_timeout: Duration,
    pub channel_capacity: usize,
}

impl Default for PriceFeedEngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(service_core::config::DEFAULT_PRICEFEED_TICK_SECS),
            source_timeout: Duration::from_secs(5),
            channel_capacity: 64,
        }
    }
}

/// Owns the per-feed timer scheduler and the update workers that drain its
/// channel. `spawn` arms one update timer and one heartbeat timer per
/// active feed; both push the feed id onto the same bounded channel.
pub struct PriceFeedEngine {
    repo: Arc<dyn PriceFeedRepository>,
    tx_manager: Arc<TransactionManager>,
    publish_signer: Signer,
    publish_gas_account: service_core::ids::GasAccountId,
    http: reqwest::Client,
    config: PriceFeedEngineConfig,
    in_flight: Arc<DashSet<PriceFeedId>>,
    shutdown: watch::Sender<bool>,
}

impl PriceFeedEngine {
    pub fn new(
        repo: Arc<dyn PriceFeedRepository>,
        tx_manager: Arc<TransactionManager>,
        publish_signer: Signer,
        publish_gas_account: service_core::ids::GasAccountId,
        config: PriceFeedEngineConfig,
    ) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.source_timeout)
            .build()
            .expect("reqwest client builds with a timeout-only configuration");
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            repo,
            tx_manager,
            publish_signer,
            publish_gas_account,
            http,
            config,
            in_flight: Arc::new(DashSet::new()),
            shutdown,
        })
    }

    pub async fn create_feed(&self, feed: PriceFeed) -> Result<(), EngineError> {
        self.repo.insert(feed).await
    }

    pub async fn get_latest_price(&self, feed: PriceFeedId) -> Result<Option<PriceDatum>, EngineError> {
        self.repo.latest(feed).await
    }

    pub async fn get_price_history(&self, feed: PriceFeedId, page: usize, page_size: usize) -> Result<Vec<PriceDatum>, EngineError> {
        self.repo.history(feed, page, page_size).await
    }

    pub async fn trigger_price_update(&self, feed: PriceFeedId) -> Result<(), EngineError> {
        let Some(feed) = self.repo.get(feed).await? else {
            return Err(EngineError::NotFound(format!("price feed {feed} not found")));
        };
        self.run_round(feed).await
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Loads active feeds and arms an update + heartbeat timer pair for
    /// each, fanning both into one bounded channel drained by a fixed
    /// worker pool (spec.md §4.3.1). Removing a feed (not yet exposed at
    /// the repository layer) would stop both timers atomically by
    /// dropping this task; shutdown drops every timer before returning.
    pub async fn spawn(self: &Arc<Self>) -> Result<(), EngineError> {
        let feeds = self.repo.list_active().await?;
        let (tx, rx) = mpsc::channel::<PriceFeedId>(self.config.channel_capacity.max(1));

        for feed in &feeds {
            let tx_update = tx.clone();
            let tx_heartbeat = tx.clone();
            let mut shutdown_update = self.shutdown.subscribe();
            let mut shutdown_heartbeat = self.shutdown.subscribe();
            let id = feed.id;
            let update_interval = Duration::from_secs(feed.update_interval_secs.max(1));
            let heartbeat_interval = Duration::from_secs(feed.heartbeat_interval_secs.max(1));

            tokio::spawn(async move {
                let mut ticker = interval(update_interval);
                loop {
                    tokio::select! {
                        _ = shutdown_update.changed() => if *shutdown_update.borrow() { return },
                        _ = ticker.tick() => { let _ = tx_update.send(id).await; }
                    }
                }
            });
            tokio::spawn(async move {
                let mut ticker = interval(heartbeat_interval);
                loop {
                    tokio::select! {
                        _ = shutdown_heartbeat.changed() => if *shutdown_heartbeat.borrow() { return },
                        _ = ticker.tick() => { let _ = tx_heartbeat.send(id).await; }
                    }
                }
            });
        }

        let engine = self.clone();
        tokio::spawn(async move { engine.run_update_workers(rx).await });
        Ok(())
    }

    async fn run_update_workers(self: Arc<Self>, mut rx: mpsc::Receiver<PriceFeedId>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => if *shutdown.borrow() { return },
                feed_id = rx.recv() => {
                    let Some(feed_id) = feed_id else { return };
                    let engine = self.clone();
                    tokio::spawn(async move { engine.process_feed(feed_id).await });
                }
            }
        }
    }

    /// Serialises rounds per feed with an in-process guard layered over
    /// the persistent `in_flight_round` flag (spec.md §4.3.2 "ordering
    /// guarantee").
    async fn process_feed(&self, feed_id: PriceFeedId) {
        if !self.in_flight.insert(feed_id) {
            return;
        }
        let result = async {
            let Some(feed) = self.repo.get(feed_id).await? else {
                return Ok(());
            };
            if feed.in_flight_round {
                return Ok(());
            }
            self.run_round(feed).await
        }
        .await;
        self.in_flight.remove(&feed_id);
        if let Err(err) = result {
            warn!("price feed {feed_id} update round failed: {err}");
        }
    }

    async fn run_round(&self, mut feed: PriceFeed) -> Result<(), EngineError> {
        feed.in_flight_round = true;
        self.repo.update(feed.clone()).await?;

        let fetches = feed.sources.iter().map(|source| self.fetch_source(source));
        let results = futures::future::join_all(fetches).await;

        let mut quotes = Vec::new();
        for (source, result) in feed.sources.iter().zip(results) {
            match result {
                Ok(price) => quotes.push((source.name().to_owned(), price)),
                Err(err) => warn!("price source {} for feed {} failed: {err}", source.name(), feed.pair),
            }
        }

        let outcome = self.publish_if_due(&mut feed, quotes).await;
        feed.in_flight_round = false;
        self.repo.update(feed).await?;
        outcome
    }

    async fn fetch_source(&self, source: &PriceSource) -> Result<Decimal, EngineError> {
        let PriceSource::Http { url, extraction_path, auth, .. } = source;
        let mut headers = HashMap::new();
        let url = apply_auth(url, &mut headers, auth)?;
        validate_outbound_url(&url).await?;
        let body = fetch_json(&self.http, &url, None, &headers).await?;
        let parsed = parse_body(&body);
        let extracted = extract(&parsed, Some(extraction_path))?;
        let raw = extracted
            .get("value")
            .ok_or_else(|| EngineError::Internal("extraction produced no value".into()))?;
        let text = match raw {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            other => return Err(EngineError::Validation(format!("price source returned non-scalar value: {other}"))),
        };
        text.parse::<Decimal>().map_err(|e| EngineError::Validation(format!("invalid price `{text}`: {e}")))
    }

    /// Gates publication on deviation or heartbeat elapsed (spec.md
    /// §4.3.2 step 3), then builds and submits the contract invocation
    /// and appends the resulting [`PriceDatum`] (step 4).
    async fn publish_if_due(&self, feed: &mut PriceFeed, quotes: Vec<(String, Decimal)>) -> Result<(), EngineError> {
        let Some(price) = aggregate(&quotes) else {
            return Ok(());
        };
        let now = get_current_time_in_seconds();
        let deviation_due = match feed.last_published_price {
            Some(previous) => {
                let deviation = percent_deviation(previous, price);
                deviation >= Decimal::from(feed.deviation_bps_threshold)
            }
            None => true,
        };
        let heartbeat_due = feed
            .last_published_time
            .map(|last| now.saturating_sub(last) >= feed.heartbeat_interval_secs)
            .unwrap_or(true);
        if !deviation_due && !heartbeat_due {
            return Ok(());
        }

        let round_id = feed.last_round_id + 1;
        let script_bytes = serde_json::json!({
            "contract": feed.on_chain_contract,
            "round_id": round_id,
            "price": price.to_string(),
        })
        .to_string()
        .into_bytes();

        let tx_id = self
            .tx_manager
            .create_transaction(
                CreateTransactionRequest {
                    service: "pricefeed".into(),
                    entity_id: feed.id.to_string(),
                    entity_type: "price-feed".into(),
                    tx_type: TransactionType::Invoke,
                    script_bytes,
                    signers: vec![self.publish_signer.clone()],
                    priority: Priority::Normal,
                    network_fee: Amount::ZERO,
                    valid_until_block: None,
                },
                self.publish_gas_account,
            )
            .await?;

        feed.last_round_id = round_id;
        feed.last_published_price = Some(price);
        feed.last_published_time = Some(now);

        self.repo
            .append_datum(PriceDatum {
                feed_id: feed.id,
                price,
                timestamp: now,
                round_id,
                on_chain_tx_hash: Some(tx_id.to_string()),
                composite_source_tag: quotes.into_iter().map(|(name, _)| name).collect::<Vec<_>>().join("+"),
            })
            .await?;
        metrics::counter!("service_engine_pricefeed_rounds_published").increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn aggregate_averages_two_values() {
        let quotes = vec![("a".to_owned(), dec("10")), ("b".to_owned(), dec("12"))];
        assert_eq!(aggregate(&quotes), Some(dec("11")));
    }

    #[test]
    fn aggregate_takes_middle_of_odd_count() {
        let quotes = vec![("a".to_owned(), dec("9")), ("b".to_owned(), dec("10")), ("c".to_owned(), dec("20"))];
        assert_eq!(aggregate(&quotes), Some(dec("10")));
    }

    #[test]
    fn aggregate_averages_centre_pair_of_even_count() {
        let quotes = vec![
            ("a".to_owned(), dec("9")),
            ("b".to_owned(), dec("10")),
            ("c".to_owned(), dec("20")),
            ("d".to_owned(), dec("21")),
        ];
        assert_eq!(aggregate(&quotes), Some(dec("15")));
    }

    #[test]
    fn aggregate_ignores_weights() {
        let low_weight = PriceSource::Http {
            name: "low".into(),
            url: "https://example.com".into(),
            extraction_path: "price".into(),
            auth: service_core::domain::AuthMethod::None,
            weight: 1,
        };
        let high_weight = PriceSource::Http {
            name: "high".into(),
            url: "https://example.com".into(),
            extraction_path: "price".into(),
            auth: service_core::domain::AuthMethod::None,
            weight: 1000,
        };
        assert_eq!(low_weight.name(), "low");
        assert_eq!(high_weight.name(), "high");
        let quotes = vec![("low".to_owned(), dec("10")), ("high".to_owned(), dec("12"))];
        assert_eq!(aggregate(&quotes), Some(dec("11")));
    }

    #[test]
    fn percent_deviation_detects_large_move() {
        assert!(percent_deviation(dec("100"), dec("110")) >= Decimal::from(1_000));
    }
}
