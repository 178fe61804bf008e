//! Uniform "run X inside attested enclave" wrapper (spec.md §4.4). Secret
//! plaintext never crosses the host boundary; callers only see return
//! values or errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use service_core::error::EngineError;
use service_core::ids::UserAccountId;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use zeroize::Zeroize;

use crate::secrets::SecretStore;

#[derive(Debug, Clone)]
pub struct TeeOperation {
    pub name: String,
    pub payload: serde_json::Value,
    pub secret_refs: Vec<(UserAccountId, String)>,
}

#[derive(Debug, Clone)]
pub struct TeeOutput {
    pub result: serde_json::Value,
    /// Opaque attestation blob surfaced to the caller, per spec.md §6.
    pub attestation: Vec<u8>,
}

#[async_trait]
pub trait TeeCoordinator: Send + Sync {
    async fn run(&self, op: TeeOperation, deadline: Duration) -> Result<TeeOutput, EngineError>;
    async fn store_secret(&self, owner: UserAccountId, name: &str, value: &[u8]) -> Result<u32, EngineError>;
    async fn get_secret_via_tee(&self, owner: UserAccountId, name: &str) -> Result<(), EngineError>;
    async fn delete_secret(&self, owner: UserAccountId, name: &str) -> Result<(), EngineError>;
}

/// Executes `op` in-process behind a semaphore sized to one session per
/// CPU (spec.md's default concurrency cap), simulating the enclave
/// boundary by zeroizing every loaded secret buffer as soon as the
/// operation returns.
pub struct LocalTeeCoordinator {
    secrets: Arc<dyn SecretStore>,
    sessions: Arc<Semaphore>,
}

impl LocalTeeCoordinator {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Arc<Self> {
        Self::with_capacity(secrets, num_cpus::get())
    }

    pub fn with_capacity(secrets: Arc<dyn SecretStore>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            secrets,
            sessions: Arc::new(Semaphore::new(capacity.max(1))),
        })
    }
}

#[async_trait]
impl TeeCoordinator for LocalTeeCoordinator {
    async fn run(&self, op: TeeOperation, deadline: Duration) -> Result<TeeOutput, EngineError> {
        let _permit = self
            .sessions
            .acquire()
            .await
            .map_err(|_| EngineError::Internal("tee session semaphore closed".to_owned()))?;

        let work = async {
            let mut loaded_secrets = Vec::with_capacity(op.secret_refs.len());
            for (owner, name) in &op.secret_refs {
                let mut value = self.secrets.get_secret(*owner, name).await?;
                loaded_secrets.push(std::mem::take(&mut *value));
            }

            // Real enclave work would execute `op` against `loaded_secrets`
            // here; the reference coordinator echoes the operation payload.
            let result = op.payload.clone();

            for mut secret in loaded_secrets {
                secret.zeroize();
            }

            Ok::<_, EngineError>(TeeOutput {
                result,
                attestation: Vec::new(),
            })
        };

        timeout(deadline, work)
            .await
            .map_err(|_| EngineError::Timeout(format!("tee operation `{}` exceeded deadline", op.name)))?
    }

    async fn store_secret(&self, owner: UserAccountId, name: &str, value: &[u8]) -> Result<u32, EngineError> {
        self.secrets.store_secret(owner, name, value).await
    }

    async fn get_secret_via_tee(&self, owner: UserAccountId, name: &str) -> Result<(), EngineError> {
        let mut value = self.secrets.get_secret(owner, name).await?;
        value.zeroize();
        Ok(())
    }

    async fn delete_secret(&self, owner: UserAccountId, name: &str) -> Result<(), EngineError> {
        self.secrets.delete_secret(owner, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::LocalSecretStore;

    #[tokio::test]
    async fn run_echoes_payload_and_wipes_secrets() {
        let secrets = LocalSecretStore::new();
        let owner = UserAccountId::new();
        secrets.store_secret(owner, "k", b"v").await.unwrap();
        let tee = LocalTeeCoordinator::new(secrets);

        let out = tee
            .run(
                TeeOperation {
                    name: "echo".into(),
                    payload: serde_json::json!({"x": 1}),
                    secret_refs: vec![(owner, "k".into())],
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(out.result, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn sessions_are_capped_by_capacity() {
        let secrets = LocalSecretStore::new();
        let tee = LocalTeeCoordinator::with_capacity(secrets, 2);
        assert_eq!(tee.sessions.available_permits(), 2);
        let permit = tee.sessions.clone().acquire_owned().await.unwrap();
        assert_eq!(tee.sessions.available_permits(), 1);
        drop(permit);
    }
}
