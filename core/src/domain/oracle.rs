use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{GasAccountId, OracleRequestId, OracleSourceId, UserAccountId};
use crate::time::TimestampSeconds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    Header,
    Query,
}

/// Replaces the source's untyped auth-params map with one variant per auth
/// kind, per the REDESIGN FLAGS note on dynamic `map[string]any` payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthMethod {
    None,
    ApiKey {
        #[serde(default = "default_api_key_location")]
        location: ApiKeyLocation,
        #[serde(default = "default_api_key_name")]
        name: String,
        value: String,
    },
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
    Custom {
        headers: HashMap<String, String>,
    },
}

fn default_api_key_location() -> ApiKeyLocation {
    ApiKeyLocation::Header
}

fn default_api_key_name() -> String {
    "api_key".to_owned()
}

/// A reusable template for materialising `OracleRequest`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSource {
    pub id: OracleSourceId,
    pub name: String,
    pub url_template: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body_template: Option<String>,
    pub auth: AuthMethod,
    pub extraction_path: Option<String>,
    pub transform: Option<String>,
    pub schedule: Option<String>,
    pub active: bool,
    pub owner: UserAccountId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OracleRequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    CallbackSent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleRequest {
    pub id: OracleRequestId,
    pub source_id: Option<OracleSourceId>,
    pub owner: UserAccountId,
    pub gas_account: GasAccountId,
    pub status: OracleRequestStatus,
    pub concrete_url: String,
    pub concrete_headers: HashMap<String, String>,
    pub concrete_body: Option<String>,
    pub extraction_path: Option<String>,
    pub transform: Option<String>,
    pub callback_address: Option<String>,
    pub callback_method: Option<String>,
    pub fee_reserved: crate::amount::Amount,
    pub result: Option<serde_json::Value>,
    pub raw_result: Option<serde_json::Value>,
    pub block_height_at_completion: Option<u64>,
    pub error: Option<String>,
    /// Set once a callback invocation has been submitted to the
    /// Transaction Manager; the request reaches `callback-sent` only
    /// after this transaction confirms (spec.md §4.2 step 7).
    pub callback_tx_id: Option<crate::ids::TransactionId>,
    pub claimed_by: Option<String>,
    pub claim_expires_at: Option<TimestampSeconds>,
    pub created: TimestampSeconds,
    pub updated: TimestampSeconds,
    /// HMAC signature over the result, delivered as part of the result
    /// envelope regardless of whether a callback was submitted (spec.md §6).
    pub result_signature: Option<String>,
    /// Stand-in transaction hash for requests with no callback configured,
    /// derived from the result signature (spec.md §4.2 step 6).
    pub pseudo_tx_hash: Option<String>,
}
