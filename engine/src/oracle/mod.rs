//! Durable oracle request queue: compose -> execute -> parse -> extract ->
//! transform -> sign -> callback -> persist (spec.md §4.2).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use service_core::amount::Amount;
use service_core::domain::{AuthMethod, OracleRequest, OracleRequestStatus, OracleSource, Signer, TransactionStatus, TransactionType};
use service_core::error::EngineError;
use service_core::ids::{OracleRequestId, OracleSourceId, TransactionId, UserAccountId};
use service_core::template;
use service_core::time::get_current_time_in_seconds;
use tokio::sync::Mutex;
use url::Url;

use crate::ledger::LedgerRepository;
use crate::net::{fetch_json, validate_outbound_url};
use crate::transaction::{CreateTransactionRequest, TransactionManager};

#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub callback_sent: u64,
}

#[async_trait]
pub trait OracleRequestRepository: Send + Sync {
    async fn insert(&self, request: OracleRequest) -> Result<(), EngineError>;
    async fn get(&self, id: OracleRequestId) -> Result<Option<OracleRequest>, EngineError>;
    async fn list(&self, source_id: Option<OracleSourceId>) -> Result<Vec<OracleRequest>, EngineError>;
    /// CAS on status `pending` -> `processing`.
    async fn claim_pending(&self) -> Result<Option<OracleRequest>, EngineError>;
    async fn update(&self, request: OracleRequest) -> Result<(), EngineError>;
    async fn statistics(&self) -> Result<Statistics, EngineError>;
    /// Looks up the request awaiting confirmation of `tx_id`'s callback
    /// delivery, so the transaction-manager hook can resolve it.
    async fn find_by_callback_tx(&self, tx_id: TransactionId) -> Result<Option<OracleRequest>, EngineError>;
}

pub struct InMemoryOracleRequestRepository {
    requests: Mutex<HashMap<OracleRequestId, OracleRequest>>,
}

impl InMemoryOracleRequestRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl OracleRequestRepository for InMemoryOracleRequestRepository {
    async fn insert(&self, request: OracleRequest) -> Result<(), EngineError> {
        self.requests.lock().await.insert(request.id, request);
        Ok(())
    }

    async fn get(&self, id: OracleRequestId) -> Result<Option<OracleRequest>, EngineError> {
        Ok(self.requests.lock().await.get(&id).cloned())
    }

    async fn list(&self, source_id: Option<OracleSourceId>) -> Result<Vec<OracleRequest>, EngineError> {
        let requests = self.requests.lock().await;
        Ok(requests
            .values()
            .filter(|r| source_id.map(|s| r.source_id == Some(s)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn claim_pending(&self) -> Result<Option<OracleRequest>, EngineError> {
        let mut requests = self.requests.lock().await;
        let id = requests
            .values()
            .filter(|r| r.status == OracleRequestStatus::Pending)
            .min_by_key(|r| r.created)
            .map(|r| r.id);
        let Some(id) = id else { return Ok(None) };
        let request = requests.get_mut(&id).expect("candidate id exists");
        request.status = OracleRequestStatus::Processing;
        request.updated = get_current_time_in_seconds();
        Ok(Some(request.clone()))
    }

    async fn update(&self, request: OracleRequest) -> Result<(), EngineError> {
        self.requests.lock().await.insert(request.id, request);
        Ok(())
    }

    async fn statistics(&self) -> Result<Statistics, EngineError> {
        let requests = self.requests.lock().await;
        let mut stats = Statistics::default();
        for request in requests.values() {
            match request.status {
                OracleRequestStatus::Pending => stats.pending += 1,
                OracleRequestStatus::Processing => stats.processing += 1,
                OracleRequestStatus::Completed => stats.completed += 1,
                OracleRequestStatus::Failed => stats.failed += 1,
                OracleRequestStatus::CallbackSent => stats.callback_sent += 1,
            }
        }
        Ok(stats)
    }

    async fn find_by_callback_tx(&self, tx_id: TransactionId) -> Result<Option<OracleRequest>, EngineError> {
        let requests = self.requests.lock().await;
        Ok(requests.values().find(|r| r.callback_tx_id == Some(tx_id)).cloned())
    }
}

pub struct CreateOracleRequestParams {
    pub owner: UserAccountId,
    pub gas_account: service_core::ids::GasAccountId,
    pub source: OracleSource,
    pub params: HashMap<String, String>,
    pub callback_address: Option<String>,
    pub callback_method: Option<String>,
    pub fee: Amount,
}

/// Applies an [`AuthMethod`] to a composed request (spec.md §4.2 step 1):
/// `api-key` goes to a header or query parameter (default header, default
/// name `api_key`); `basic` becomes a base64 `Authorization: Basic`
/// header; `bearer` (covering both `jwt` and `oauth` per spec.md §3)
/// becomes `Authorization: Bearer`; `custom` turns every param into a
/// header verbatim.
pub(crate) fn apply_auth(url: &str, headers: &mut HashMap<String, String>, auth: &AuthMethod) -> Result<String, EngineError> {
    match auth {
        AuthMethod::None => Ok(url.to_owned()),
        AuthMethod::ApiKey { location, name, value } => match location {
            service_core::domain::ApiKeyLocation::Header => {
                headers.insert(name.clone(), value.clone());
                Ok(url.to_owned())
            }
            service_core::domain::ApiKeyLocation::Query => {
                let mut parsed = Url::parse(url).map_err(|e| EngineError::Validation(format!("invalid URL `{url}`: {e}")))?;
                parsed.query_pairs_mut().append_pair(name, value);
                Ok(parsed.to_string())
            }
        },
        AuthMethod::Basic { username, password } => {
            let token = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, format!("{username}:{password}"));
            headers.insert("Authorization".to_owned(), format!("Basic {token}"));
            Ok(url.to_owned())
        }
        AuthMethod::Bearer { token } => {
            headers.insert("Authorization".to_owned(), format!("Bearer {token}"));
            Ok(url.to_owned())
        }
        AuthMethod::Custom { headers: custom } => {
            for (k, v) in custom {
                headers.insert(k.clone(), v.clone());
            }
            Ok(url.to_owned())
        }
    }
}

/// Composes a concrete request from a source template: applies whitelisted
/// substitution to the URL/body/headers, applies auth, and validates the
/// resulting URL against SSRF protections before it is ever persisted
/// (spec.md §9 "Template rendering errors are caught before claim").
fn materialize(params: CreateOracleRequestParams) -> Result<OracleRequest, EngineError> {
    let rendered_url = template::render(&params.source.url_template, &params.params)?;
    Url::parse(&rendered_url).map_err(|e| EngineError::Validation(format!("invalid URL `{rendered_url}`: {e}")))?;

    let body = params
        .source
        .body_template
        .as_ref()
        .map(|b| template::render(b, &params.params))
        .transpose()?;

    let mut headers = HashMap::new();
    for (k, v) in &params.source.headers {
        headers.insert(k.clone(), template::render(v, &params.params)?);
    }
    let url = apply_auth(&rendered_url, &mut headers, &params.source.auth)?;

    let now = get_current_time_in_seconds();
    Ok(OracleRequest {
        id: OracleRequestId::new(),
        source_id: Some(params.source.id),
        owner: params.owner,
        gas_account: params.gas_account,
        status: OracleRequestStatus::Pending,
        concrete_url: url,
        concrete_headers: headers,
        concrete_body: body,
        extraction_path: params.source.extraction_path,
        transform: params.source.transform,
        callback_address: params.callback_address,
        callback_method: params.callback_method,
        fee_reserved: params.fee,
        result: None,
        raw_result: None,
        block_height_at_completion: None,
        error: None,
        callback_tx_id: None,
        claimed_by: None,
        claim_expires_at: None,
        created: now,
        updated: now,
        result_signature: None,
        pseudo_tx_hash: None,
    })
}

/// Rewrites bare `a.b.c` paths to `$.a.b.c`; `$…` forms pass through
/// unchanged (spec.md §4.2 step 4).
fn normalize_jsonpath(path: &str) -> String {
    if path.starts_with('$') {
        path.to_owned()
    } else {
        format!("$.{path}")
    }
}

/// Parses the HTTP body per spec.md §4.2 step 3: object as-is, array
/// wrapped as `{array: [...]}`, anything else wrapped as `{text: "..."}`.
pub(crate) fn parse_body(body: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
        Ok(serde_json::Value::Array(arr)) => serde_json::json!({ "array": arr }),
        Ok(other) => serde_json::json!({ "text": other.to_string() }),
        Err(_) => serde_json::json!({ "text": body }),
    }
}

pub(crate) fn extract(parsed: &serde_json::Value, extraction_path: Option<&str>) -> Result<serde_json::Value, EngineError> {
    let Some(path) = extraction_path else {
        return Ok(parsed.clone());
    };
    let path = normalize_jsonpath(path);
    let mut selector = jsonpath_lib::selector(parsed);
    let found = selector(&path).map_err(|e| EngineError::Internal(format!("jsonpath error: {e}")))?;
    let value = found.first().map(|v| (*v).clone()).unwrap_or(serde_json::Value::Null);
    Ok(serde_json::json!({ "value": value }))
}

/// Numeric-coercion-only transform: the source's richer transforms were
/// never implemented upstream and the spec freezes that behaviour
/// (spec.md §9 "suspected source bugs" — deliberately not "fixed" here).
fn transform(mut value: serde_json::Value, transform_kind: Option<&str>) -> serde_json::Value {
    if transform_kind == Some("numeric") {
        if let Some(obj) = value.as_object_mut() {
            if let Some(v) = obj.get("value").and_then(|v| v.as_str()) {
                if let Ok(parsed) = v.parse::<f64>() {
                    obj.insert("value".to_owned(), serde_json::json!(parsed));
                }
            }
        }
    }
    value
}

pub struct OracleProcessor {
    repo: Arc<dyn OracleRequestRepository>,
    ledger: Arc<dyn LedgerRepository>,
    tx_manager: Arc<TransactionManager>,
    /// Wallet signing the callback contract invocation on behalf of the
    /// oracle service namespace (spec.md §3 "owned by a service namespace").
    callback_signer: Signer,
    http: reqwest::Client,
    signing_key: Vec<u8>,
    in_flight: DashSet<OracleRequestId>,
}

impl OracleProcessor {
    pub fn new(
        repo: Arc<dyn OracleRequestRepository>,
        ledger: Arc<dyn LedgerRepository>,
        tx_manager: Arc<TransactionManager>,
        callback_signer: Signer,
        signing_key: Vec<u8>,
        http_timeout: Duration,
    ) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .expect("reqwest client builds with a timeout-only configuration");
        Arc::new(Self {
            repo,
            ledger,
            tx_manager,
            callback_signer,
            http,
            signing_key,
            in_flight: DashSet::new(),
        })
    }

    pub async fn create_request(&self, params: CreateOracleRequestParams) -> Result<OracleRequestId, EngineError> {
        self.ledger.reserve(params.gas_account, params.fee).await?;
        let request = materialize(params)?;
        let id = request.id;
        self.repo.insert(request).await?;
        metrics::counter!("service_engine_oracle_requests_created").increment(1);
        Ok(id)
    }

    pub async fn get_request(&self, id: OracleRequestId) -> Result<Option<OracleRequest>, EngineError> {
        self.repo.get(id).await
    }

    pub async fn statistics(&self) -> Result<Statistics, EngineError> {
        self.repo.statistics().await
    }

    /// One tick of the worker loop: claims at most one pending request and
    /// drives it to a terminal status (or, with a callback configured, to
    /// `processing` with a callback transaction in flight). In-process
    /// `in_flight` set plus the persistent status CAS provide
    /// belt-and-braces protection against a second worker picking up the
    /// same request (spec.md invariant iv).
    pub async fn process_one(&self) -> Result<bool, EngineError> {
        let Some(request) = self.repo.claim_pending().await? else {
            return Ok(false);
        };
        if !self.in_flight.insert(request.id) {
            return Ok(false);
        }
        let result = self.run_pipeline(request.clone()).await;
        self.in_flight.remove(&request.id);

        match result {
            Ok(mut awaiting_callback) if awaiting_callback.callback_tx_id.is_some() => {
                awaiting_callback.updated = get_current_time_in_seconds();
                self.repo.update(awaiting_callback).await?;
            }
            Ok(mut completed) => {
                // Release any unused portion of the fee reservation
                // (spec.md §4.2 step 8); the reference pipeline does not
                // yet meter actual usage, so the full reservation is freed.
                let _ = self.ledger.release_reservation(completed.gas_account, completed.fee_reserved).await;
                completed.status = OracleRequestStatus::Completed;
                completed.updated = get_current_time_in_seconds();
                self.repo.update(completed).await?;
                metrics::counter!("service_engine_oracle_requests_completed").increment(1);
            }
            Err((mut failed, error)) => {
                let _ = self.ledger.release_reservation(failed.gas_account, failed.fee_reserved).await;
                failed.status = OracleRequestStatus::Failed;
                failed.error = Some(error);
                failed.updated = get_current_time_in_seconds();
                self.repo.update(failed).await?;
                metrics::counter!("service_engine_oracle_requests_failed").increment(1);
            }
        }
        Ok(true)
    }

    async fn run_pipeline(&self, mut request: OracleRequest) -> Result<OracleRequest, (OracleRequest, String)> {
        validate_outbound_url(&request.concrete_url)
            .await
            .map_err(|e| (request.clone(), e.to_string()))?;

        let response = fetch_json(
            &self.http,
            &request.concrete_url,
            request.concrete_body.clone(),
            &request.concrete_headers,
        )
        .await
        .map_err(|e| (request.clone(), e.to_string()))?;

        let body = parse_body(&response);
        let extracted = extract(&body, request.extraction_path.as_deref()).map_err(|e| (request.clone(), e.to_string()))?;
        let transformed = transform(extracted, request.transform.as_deref());

        let signed_json = transformed.to_string();
        let signature = service_core::hmac_sign::sign(&self.signing_key, get_current_time_in_seconds(), &signed_json);

        request.result = Some(transformed);
        request.raw_result = Some(body);
        request.result_signature = Some(signature.clone());

        match (&request.callback_address, &request.callback_method) {
            (Some(address), Some(method)) => {
                // A real callback is configured: route through the
                // Transaction Manager rather than assign the pseudo-hash
                // (spec.md §9 — "when a callback exists, a real
                // transaction must be submitted").
                let script_bytes = serde_json::json!({
                    "contract": address,
                    "method": method,
                    "result": signed_json,
                    "signature": signature,
                })
                .to_string()
                .into_bytes();

                let tx_id = self
                    .tx_manager
                    .create_transaction(
                        CreateTransactionRequest {
                            service: "oracle".into(),
                            entity_id: request.id.to_string(),
                            entity_type: "oracle-request".into(),
                            tx_type: TransactionType::Invoke,
                            script_bytes,
                            signers: vec![self.callback_signer.clone()],
                            priority: service_core::domain::Priority::Normal,
                            network_fee: service_core::amount::Amount::ZERO,
                            valid_until_block: None,
                        },
                        request.gas_account,
                    )
                    .await
                    .map_err(|e| (request.clone(), e.to_string()))?;
                request.callback_tx_id = Some(tx_id);
            }
            _ => {
                // No callback configured; the pseudo-hash derived from the
                // HMAC signature stands in for an on-chain reference
                // (spec.md §9).
                let pseudo_hash = hex::encode(&signature.as_bytes()[..8.min(signature.len())]);
                request.block_height_at_completion = None;
                request.error = None;
                request.pseudo_tx_hash = Some(pseudo_hash);
            }
        }
        Ok(request)
    }

    /// Hook target for the Transaction Manager's confirmation watcher
    /// (spec.md §4.2 step 7): transitions the oracle request that
    /// submitted `tx_id` to `callback-sent` once confirmed, or `failed`
    /// otherwise.
    pub async fn handle_callback_outcome(&self, tx_id: TransactionId, status: TransactionStatus) {
        let Ok(Some(mut request)) = self.repo.find_by_callback_tx(tx_id).await else {
            return;
        };
        let _ = self.ledger.release_reservation(request.gas_account, request.fee_reserved).await;
        request.updated = get_current_time_in_seconds();
        match status {
            TransactionStatus::Confirmed => {
                let tx = self.tx_manager.get_transaction(tx_id).await.ok().flatten();
                request.block_height_at_completion = tx.and_then(|t| t.block_height);
                request.status = OracleRequestStatus::CallbackSent;
                metrics::counter!("service_engine_oracle_requests_callback_sent").increment(1);
            }
            _ => {
                request.status = OracleRequestStatus::Failed;
                request.error = Some("callback delivery failed".to_owned());
                metrics::counter!("service_engine_oracle_requests_failed").increment(1);
            }
        }
        let _ = self.repo.update(request).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_jsonpath_rewrites_bare_paths() {
        assert_eq!(normalize_jsonpath("data.price"), "$.data.price");
        assert_eq!(normalize_jsonpath("$.data.price"), "$.data.price");
    }

    #[test]
    fn parse_body_wraps_non_objects() {
        assert_eq!(parse_body("[1,2,3]"), serde_json::json!({ "array": [1, 2, 3] }));
        assert_eq!(parse_body("not json"), serde_json::json!({ "text": "not json" }));
        assert_eq!(parse_body(r#"{"a":1}"#), serde_json::json!({ "a": 1 }));
    }

    #[test]
    fn parse_body_wraps_bare_scalars_as_text() {
        assert_eq!(parse_body("42"), serde_json::json!({ "text": "42" }));
        assert_eq!(parse_body("true"), serde_json::json!({ "text": "true" }));
    }

    #[test]
    fn extract_applies_jsonpath_and_wraps_value() {
        let parsed = serde_json::json!({ "data": { "price": "12.34" } });
        let extracted = extract(&parsed, Some("data.price")).unwrap();
        assert_eq!(extracted, serde_json::json!({ "value": "12.34" }));
    }

    #[test]
    fn transform_coerces_numeric_strings_only() {
        let value = serde_json::json!({ "value": "12.34" });
        let transformed = transform(value, Some("numeric"));
        assert_eq!(transformed, serde_json::json!({ "value": 12.34 }));
    }

    #[test]
    fn transform_ignores_unknown_kinds() {
        let value = serde_json::json!({ "value": "12.34" });
        let transformed = transform(value.clone(), Some("richer-transform-not-supported"));
        assert_eq!(transformed, value);
    }
}
