//! The secret store contract consulted only from within the TEE
//! coordinator. Secrets at rest are encrypted with `chacha20poly1305`
//! under a process-sealed key; plaintext never crosses the host boundary.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, Generate, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use service_core::error::EngineError;
use service_core::ids::UserAccountId;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn store_secret(&self, owner: UserAccountId, name: &str, value: &[u8]) -> Result<u32, EngineError>;
    /// Returns decrypted plaintext. Only the TEE coordinator should call
    /// this; engines outside it must never hold the result.
    async fn get_secret(&self, owner: UserAccountId, name: &str) -> Result<Zeroizing<Vec<u8>>, EngineError>;
    async fn delete_secret(&self, owner: UserAccountId, name: &str) -> Result<(), EngineError>;
}

struct StoredSecret {
    version: u32,
    nonce: [u8; 12],
    ciphertext: Vec<u8>,
}

/// Key sealed to this process only; never persisted, never logged.
pub struct LocalSecretStore {
    cipher: ChaCha20Poly1305,
    secrets: RwLock<HashMap<(UserAccountId, String), StoredSecret>>,
}

impl LocalSecretStore {
    pub fn new() -> Arc<Self> {
        let key = Key::generate();
        Self::with_key(key)
    }

    fn with_key(key: Key) -> Arc<Self> {
        Arc::new(Self {
            cipher: ChaCha20Poly1305::new(&key),
            secrets: RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl SecretStore for LocalSecretStore {
    async fn store_secret(&self, owner: UserAccountId, name: &str, value: &[u8]) -> Result<u32, EngineError> {
        let nonce = Nonce::generate();
        let ciphertext = self
            .cipher
            .encrypt(&nonce, value)
            .map_err(|_| EngineError::Internal("secret encryption failed".to_owned()))?;

        let mut secrets = self.secrets.write().await;
        let key = (owner, name.to_owned());
        let version = secrets.get(&key).map(|s| s.version + 1).unwrap_or(1);
        secrets.insert(
            key,
            StoredSecret {
                version,
                nonce: nonce.into(),
                ciphertext,
            },
        );
        Ok(version)
    }

    async fn get_secret(&self, owner: UserAccountId, name: &str) -> Result<Zeroizing<Vec<u8>>, EngineError> {
        let secrets = self.secrets.read().await;
        let stored = secrets
            .get(&(owner, name.to_owned()))
            .ok_or_else(|| EngineError::NotFound(format!("secret {name}")))?;
        let nonce = Nonce::from(stored.nonce);
        let plaintext = self
            .cipher
            .decrypt(&nonce, stored.ciphertext.as_ref())
            .map_err(|_| EngineError::Internal("secret decryption failed".to_owned()))?;
        Ok(Zeroizing::new(plaintext))
    }

    async fn delete_secret(&self, owner: UserAccountId, name: &str) -> Result<(), EngineError> {
        let mut secrets = self.secrets.write().await;
        secrets
            .remove(&(owner, name.to_owned()))
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(format!("secret {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_secret_plaintext() {
        let store = LocalSecretStore::new();
        let owner = UserAccountId::new();
        store.store_secret(owner, "api-key", b"s3cr3t").await.unwrap();
        let value = store.get_secret(owner, "api-key").await.unwrap();
        assert_eq!(&value[..], b"s3cr3t");
    }

    #[tokio::test]
    async fn versions_increment_on_overwrite() {
        let store = LocalSecretStore::new();
        let owner = UserAccountId::new();
        let v1 = store.store_secret(owner, "api-key", b"first").await.unwrap();
        let v2 = store.store_secret(owner, "api-key", b"second").await.unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn missing_secret_is_not_found() {
        let store = LocalSecretStore::new();
        let err = store.get_secret(UserAccountId::new(), "missing").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
