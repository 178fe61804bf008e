use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{TriggerId, UserAccountId};
use crate::time::TimestampSeconds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    Cron,
    BlockchainEvent,
    PriceCondition,
    FunctionResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceCondition {
    Above,
    Below,
    ChangePercent,
}

/// A single equality/range predicate over a blockchain-event parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum EventFilterPredicate {
    Equals { field: String, value: serde_json::Value },
    Range { field: String, min: Option<f64>, max: Option<f64> },
}

/// Tagged union replacing the untyped trigger-config map (spec.md §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TriggerConfig {
    Cron {
        schedule: String,
        timezone: String,
    },
    BlockchainEvent {
        contract_hash: String,
        event_name: String,
        filter: Vec<EventFilterPredicate>,
    },
    PriceCondition {
        pair: String,
        condition: PriceCondition,
        threshold: f64,
        sustain_duration_secs: u64,
    },
    FunctionResult {
        source_trigger_id: TriggerId,
    },
}

impl TriggerConfig {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerConfig::Cron { .. } => TriggerKind::Cron,
            TriggerConfig::BlockchainEvent { .. } => TriggerKind::BlockchainEvent,
            TriggerConfig::PriceCondition { .. } => TriggerKind::PriceCondition,
            TriggerConfig::FunctionResult { .. } => TriggerKind::FunctionResult,
        }
    }
}

/// One variant per action kind, replacing an untyped action payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ActionKind {
    TeeCall {
        function_name: String,
        params: HashMap<String, String>,
    },
    ContractInvoke {
        contract_hash: String,
        method: String,
        params: HashMap<String, String>,
    },
    Webhook {
        url: String,
        method: String,
        body_template: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnPersistentFailure {
    Disable,
    Alert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub retry_interval_secs: u64,
    pub on_persistent_failure: OnPersistentFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerStatus {
    Active,
    Paused,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub id: TriggerId,
    pub owner: UserAccountId,
    pub target_function: Option<String>,
    pub target_contract: Option<String>,
    pub config: TriggerConfig,
    pub action: ActionKind,
    pub retry_policy: RetryPolicy,
    pub status: TriggerStatus,
    pub last_fired_next: Option<TimestampSeconds>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerEventStatus {
    Fired,
    Skipped,
    Retried,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub trigger_id: TriggerId,
    pub timestamp: TimestampSeconds,
    pub status: TriggerEventStatus,
    pub execution_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_config_kind_matches_variant() {
        let cfg = TriggerConfig::Cron {
            schedule: "0 * * * * *".into(),
            timezone: "UTC".into(),
        };
        assert_eq!(cfg.kind(), TriggerKind::Cron);
    }

    #[test]
    fn trigger_config_round_trips_through_json() {
        let cfg = TriggerConfig::PriceCondition {
            pair: "NEO-USD".into(),
            condition: PriceCondition::Above,
            threshold: 10.0,
            sustain_duration_secs: 60,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: TriggerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), TriggerKind::PriceCondition);
    }
}
