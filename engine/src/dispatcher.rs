//! Breaks the cyclic dependency between the transaction manager and its
//! callers (oracle processor, price-feed engine, automation engine):
//! instead of the transaction manager depending on them, each registers a
//! hook keyed by `(service, entity_type)` that the confirmation watcher
//! invokes on `confirmed`/`failed` (spec.md §9 "Cyclic references").

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use service_core::domain::TransactionStatus;
use service_core::ids::TransactionId;

pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type Hook = Arc<dyn Fn(TransactionId, TransactionStatus) -> HookFuture + Send + Sync>;

#[derive(Default)]
pub struct TransactionHookRegistry {
    hooks: DashMap<(String, String), Hook>,
}

impl TransactionHookRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, service: impl Into<String>, entity_type: impl Into<String>, hook: Hook) {
        self.hooks.insert((service.into(), entity_type.into()), hook);
    }

    pub async fn dispatch(&self, service: &str, entity_type: &str, tx_id: TransactionId, status: TransactionStatus) {
        let hook = self
            .hooks
            .get(&(service.to_owned(), entity_type.to_owned()))
            .map(|entry| entry.value().clone());
        if let Some(hook) = hook {
            hook(tx_id, status).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn dispatch_invokes_registered_hook_only_for_matching_key() {
        let registry = TransactionHookRegistry::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        registry.register(
            "oracle",
            "oracle-request",
            Arc::new(move |_id, _status| {
                let fired = fired_clone.clone();
                Box::pin(async move {
                    fired.store(true, Ordering::SeqCst);
                })
            }),
        );

        registry
            .dispatch("automation", "trigger", TransactionId::new(), TransactionStatus::Confirmed)
            .await;
        assert!(!fired.load(Ordering::SeqCst));

        registry
            .dispatch("oracle", "oracle-request", TransactionId::new(), TransactionStatus::Confirmed)
            .await;
        assert!(fired.load(Ordering::SeqCst));
    }
}
