//! Per-identity key material, created once by `prepare` and kept in the store.
//!
//! Recipients register the same way as owners: their delegating key pair is
//! what fragments get re-encrypted to.

use crate::pre::{Params, PublicKey, SecretKey, Signer};
use crate::service::error::ServiceError;
use crate::service::retry::RetryingStore;
use crate::service::store::{decode_record, encode_record};
use crate::service::{validate_id, Clock};

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

/// What is persisted per identity. Keys are hex encoded.
#[derive(Clone, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub delegating_secret_key: String,
    pub public_key: String,
    pub signing_secret_key: String,
    pub verifying_key: String,
    pub created_at: DateTime<Utc>,
}

impl Drop for OwnerRecord {
    fn drop(&mut self) {
        self.delegating_secret_key.zeroize();
        self.signing_secret_key.zeroize();
    }
}

impl fmt::Debug for OwnerRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OwnerRecord")
            .field("public_key", &self.public_key)
            .field("verifying_key", &self.verifying_key)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Public half of a prepared identity, safe to hand out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedOwner {
    pub owner_id: String,
    pub public_key: String,
    pub verifying_key: String,
    /// False when the identity already existed.
    pub created: bool,
}

/// Decoded keys of one identity.
pub struct OwnerKeys {
    pub delegating_sk: SecretKey,
    pub signer: Signer,
    pub public_key: PublicKey,
    pub verifying_key: PublicKey,
}

pub struct OwnerRegistry {
    store: RetryingStore,
    params: Arc<Params>,
    prefix: String,
    clock: Arc<dyn Clock>,
}

impl OwnerRegistry {
    pub fn new(
        store: RetryingStore,
        params: Arc<Params>,
        prefix: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            params,
            prefix: prefix.into(),
            clock,
        }
    }

    fn path(&self, owner_id: &str) -> String {
        format!("{}/owners/{}", self.prefix, owner_id)
    }

    /// Creates key material for `owner_id`, or returns the existing public keys.
    pub async fn prepare(&self, owner_id: &str) -> Result<PreparedOwner, ServiceError> {
        validate_id("owner_id", owner_id)?;
        let path = self.path(owner_id);

        if let Some(existing) = self.read(&path).await? {
            tracing::debug!(owner_id, "owner already registered");
            return Ok(prepared(owner_id, &existing, false));
        }

        let delegating_sk = SecretKey::random(&self.params)?;
        let signer = Signer::new(&self.params)?;
        let record = OwnerRecord {
            delegating_secret_key: hex::encode(&*delegating_sk.to_secret_bytes()),
            public_key: hex::encode(delegating_sk.public_key().to_bytes()),
            signing_secret_key: hex::encode(&*signer.to_secret_bytes()?),
            verifying_key: hex::encode(signer.verifying_key().to_bytes()),
            created_at: self.clock.now(),
        };
        let mut data = encode_record(&record)?;
        let written = self.store.put_if_absent(&path, &data).await;
        for value in data.values_mut() {
            if let serde_json::Value::String(s) = value {
                s.zeroize();
            }
        }

        if written? {
            tracing::info!(owner_id, "registered new owner");
            return Ok(prepared(owner_id, &record, true));
        }

        // Lost a concurrent prepare; the stored keys win.
        match self.read(&path).await? {
            Some(existing) => Ok(prepared(owner_id, &existing, false)),
            None => Err(ServiceError::Dependency(format!(
                "owner {} vanished during prepare",
                owner_id
            ))),
        }
    }

    /// Loads every key of `owner_id`, secret ones included.
    pub async fn load(&self, owner_id: &str) -> Result<OwnerKeys, ServiceError> {
        let record = self.require(owner_id).await?;

        let delegating_bytes = decode_hex(owner_id, &record.delegating_secret_key)?;
        let signing_bytes = decode_hex(owner_id, &record.signing_secret_key)?;
        let delegating_sk = SecretKey::from_bytes(&delegating_bytes, &self.params)
            .map_err(|_| corrupt(owner_id))?;
        let signer =
            Signer::from_secret_bytes(&signing_bytes, &self.params).map_err(|_| corrupt(owner_id))?;

        let public_key = delegating_sk.public_key();
        let verifying_key = signer.verifying_key().clone();
        Ok(OwnerKeys {
            delegating_sk,
            signer,
            public_key,
            verifying_key,
        })
    }

    /// Public key and verifying key of `owner_id`.
    pub async fn public_keys(&self, owner_id: &str) -> Result<(PublicKey, PublicKey), ServiceError> {
        let record = self.require(owner_id).await?;
        let public_key = self.decode_point(owner_id, &record.public_key)?;
        let verifying_key = self.decode_point(owner_id, &record.verifying_key)?;
        Ok((public_key, verifying_key))
    }

    async fn require(&self, owner_id: &str) -> Result<OwnerRecord, ServiceError> {
        validate_id("owner_id", owner_id)?;
        self.read(&self.path(owner_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("owner {}", owner_id)))
    }

    async fn read(&self, path: &str) -> Result<Option<OwnerRecord>, ServiceError> {
        match self.store.get(path).await? {
            Some(data) => Ok(Some(decode_record(data)?)),
            None => Ok(None),
        }
    }

    fn decode_point(&self, owner_id: &str, encoded: &str) -> Result<PublicKey, ServiceError> {
        let bytes = hex::decode(encoded).map_err(|_| corrupt(owner_id))?;
        PublicKey::from_bytes(&bytes, &self.params).map_err(|_| corrupt(owner_id))
    }
}

fn prepared(owner_id: &str, record: &OwnerRecord, created: bool) -> PreparedOwner {
    PreparedOwner {
        owner_id: owner_id.to_string(),
        public_key: record.public_key.clone(),
        verifying_key: record.verifying_key.clone(),
        created,
    }
}

fn decode_hex(owner_id: &str, encoded: &str) -> Result<Zeroizing<Vec<u8>>, ServiceError> {
    hex::decode(encoded)
        .map(Zeroizing::new)
        .map_err(|_| corrupt(owner_id))
}

fn corrupt(owner_id: &str) -> ServiceError {
    ServiceError::Dependency(format!("stored keys of owner {} are corrupt", owner_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pre::new_standard_params;
    use crate::service::clock::SystemClock;
    use crate::service::retry::StoreCaller;
    use crate::service::store::{InMemoryStore, SecretStore};
    use std::time::Duration;

    fn registry(store: Arc<dyn SecretStore>) -> OwnerRegistry {
        let caller = StoreCaller::new(Duration::from_secs(1), 0, Duration::from_millis(1));
        OwnerRegistry::new(
            RetryingStore::new(store, caller),
            new_standard_params().unwrap(),
            "umbral",
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn prepare_is_idempotent() {
        let registry = registry(Arc::new(InMemoryStore::new()));

        let first = registry.prepare("alice").await.unwrap();
        assert!(first.created);
        assert_eq!(first.public_key.len(), 66);

        let second = registry.prepare("alice").await.unwrap();
        assert!(!second.created);
        assert_eq!(first.public_key, second.public_key);
        assert_eq!(first.verifying_key, second.verifying_key);

        let keys = registry.load("alice").await.unwrap();
        assert_eq!(hex::encode(keys.public_key.to_bytes()), first.public_key);
        assert_eq!(hex::encode(keys.verifying_key.to_bytes()), first.verifying_key);
        assert_eq!(keys.delegating_sk.public_key(), keys.public_key);
    }

    #[tokio::test]
    async fn concurrent_prepare_agrees_on_keys() {
        let registry = Arc::new(registry(Arc::new(InMemoryStore::new())));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.prepare("carol").await.unwrap() }));
        }
        let mut keys = Vec::new();
        let mut created = 0;
        for handle in handles {
            let prepared = handle.await.unwrap();
            created += prepared.created as usize;
            keys.push(prepared.public_key);
        }
        assert_eq!(created, 1);
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn unknown_owner_is_not_found() {
        let registry = registry(Arc::new(InMemoryStore::new()));
        assert_eq!(registry.load("nobody").await.err().unwrap().kind(), "not_found");
        assert_eq!(
            registry.public_keys("nobody").await.err().unwrap().kind(),
            "not_found"
        );
    }

    #[tokio::test]
    async fn rejects_bad_identifiers() {
        let registry = registry(Arc::new(InMemoryStore::new()));
        for bad in ["", "a/b", "../x", "with space"] {
            assert_eq!(registry.prepare(bad).await.unwrap_err().kind(), "validation");
        }
    }

    #[tokio::test]
    async fn corrupt_record_is_a_dependency_error() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry(store.clone());
        registry.prepare("dave").await.unwrap();

        let mut data = store.get("umbral/owners/dave").await.unwrap().unwrap();
        data.insert("delegating_secret_key".into(), "zz".into());
        store.put("umbral/owners/dave", &data).await.unwrap();

        assert_eq!(registry.load("dave").await.err().unwrap().kind(), "dependency");
    }

    #[test]
    fn record_debug_hides_secrets() {
        let record = OwnerRecord {
            delegating_secret_key: "aa".repeat(32),
            public_key: "02".into(),
            signing_secret_key: "bb".repeat(32),
            verifying_key: "03".into(),
            created_at: Utc::now(),
        };
        let printed = format!("{:?}", record);
        assert!(!printed.contains("aaaa"));
        assert!(!printed.contains("bbbb"));
    }
}
