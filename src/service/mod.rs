//! Delegated access on top of the PRE engine.
//!
//! [`ProxyService`] keeps owner keys and rekey records in a [`SecretStore`],
//! turns capsules into capsule fragments for a live rekey, and offers the
//! recipient-side decrypt used in tests and demos.

pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod owner;
pub mod rekey;
pub mod retry;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ServiceConfig, StoreBackend, StoreConfig};
pub use error::ServiceError;
pub use ledger::{GrantLedger, LedgerError, TracingLedger};
pub use owner::{OwnerRegistry, PreparedOwner};
pub use rekey::{RekeyManager, RekeyRecord};
pub use retry::{RetryingStore, StoreCaller};
pub use store::{FileStore, InMemoryStore, SecretData, SecretStore, StoreError};

use crate::internal::schemes::DEM_MIN_SIZE;
use crate::pre::{self, Capsule, CapsuleFrag, Params};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

const MAX_ID_LENGTH: usize = 128;

/// Identifiers become store path segments, so they are kept to a safe alphabet.
pub(crate) fn validate_id(field: &str, value: &str) -> Result<(), ServiceError> {
    let valid = !value.is_empty()
        && value.len() <= MAX_ID_LENGTH
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(ServiceError::Validation(format!("invalid {}: {:?}", field, value)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RekeyRequest {
    pub owner_id: String,
    pub recipient_id: String,
    pub resource_id: String,
    pub expiry: DateTime<Utc>,
    pub threshold: usize,
    pub shares: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RekeyResponse {
    pub rekey_id: String,
    pub owner_id: String,
    pub recipient_id: String,
    pub resource_id: String,
    pub expiry: DateTime<Utc>,
    pub threshold: usize,
    pub shares: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptRequest {
    pub recipient_id: String,
    pub owner_id: String,
    pub capsule: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub cfrags: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub capsule: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `healthy` or `degraded`.
    pub status: String,
    pub store_connected: bool,
    pub timestamp: DateTime<Utc>,
}

pub struct ProxyService {
    params: Arc<Params>,
    store: RetryingStore,
    owners: Arc<OwnerRegistry>,
    rekeys: Arc<RekeyManager>,
    clock: Arc<dyn Clock>,
    sweep_interval: Option<Duration>,
}

impl ProxyService {
    /// Builds the service with the store backend named in `config`, the wall
    /// clock and a ledger that only logs.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let store = store::open_store(&config.store)
            .map_err(|e| ServiceError::Config(format!("cannot open store: {}", e)))?;
        Self::with_parts(config, store, Arc::new(TracingLedger), Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: &ServiceConfig,
        store: Arc<dyn SecretStore>,
        ledger: Arc<dyn GrantLedger>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let params = config.params()?;
        let store = RetryingStore::new(store, StoreCaller::from_config(&config.store));
        let owners = Arc::new(OwnerRegistry::new(
            store.clone(),
            params.clone(),
            config.key_prefix.clone(),
            clock.clone(),
        ));
        let rekeys = Arc::new(RekeyManager::new(
            store.clone(),
            owners.clone(),
            ledger,
            clock.clone(),
            params.clone(),
            config.key_prefix.clone(),
            config.trust_stored_kfrags,
        ));

        tracing::debug!(
            curve = %config.curve,
            prefix = %config.key_prefix,
            trust_stored_kfrags = config.trust_stored_kfrags,
            "proxy service configured"
        );

        Ok(Self {
            params,
            store,
            owners,
            rekeys,
            clock,
            sweep_interval: config.sweep_interval_secs.map(Duration::from_secs),
        })
    }

    pub fn params(&self) -> &Arc<Params> {
        &self.params
    }

    pub fn rekeys(&self) -> &Arc<RekeyManager> {
        &self.rekeys
    }

    /// Starts the expired-rekey sweeper when an interval is configured.
    /// Must be called from within a tokio runtime.
    pub fn start_sweeper(&self) -> Option<JoinHandle<()>> {
        self.sweep_interval.map(|interval| {
            tracing::info!(interval_secs = interval.as_secs(), "starting rekey sweeper");
            Arc::clone(&self.rekeys).spawn_sweeper(interval)
        })
    }

    /// Registers an identity, owner or recipient. Idempotent.
    pub async fn prepare(&self, owner_id: &str) -> Result<PreparedOwner, ServiceError> {
        self.owners.prepare(owner_id).await
    }

    pub async fn rekey(&self, request: RekeyRequest) -> Result<RekeyResponse, ServiceError> {
        let rekey_id = self
            .rekeys
            .create(
                &request.owner_id,
                &request.recipient_id,
                &request.resource_id,
                request.expiry,
                request.threshold,
                request.shares,
            )
            .await?;
        let record = self.rekeys.get(&rekey_id).await?;

        Ok(RekeyResponse {
            rekey_id,
            owner_id: request.owner_id,
            recipient_id: request.recipient_id,
            resource_id: request.resource_id,
            expiry: record.expiry,
            threshold: request.threshold,
            shares: request.shares,
        })
    }

    /// Produces one serialized capsule fragment per stored kfrag.
    ///
    /// The ciphertext is not read beyond a size check; it travels with the
    /// fragments to the recipient.
    pub async fn reencrypt(
        &self,
        rekey_id: &str,
        capsule: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<Vec<u8>>, ServiceError> {
        let record = self.rekeys.get(rekey_id).await?;

        let capsule = Capsule::from_bytes(capsule, &self.params)?;
        if ciphertext.len() < DEM_MIN_SIZE {
            return Err(ServiceError::Validation(format!(
                "ciphertext shorter than {} bytes",
                DEM_MIN_SIZE
            )));
        }
        let kfrags = self.rekeys.load_kfrags(&record)?;

        let cfrags = tokio::task::spawn_blocking(move || {
            kfrags
                .iter()
                .map(|kfrag| pre::reencrypt(&capsule, kfrag).map(|cfrag| cfrag.to_bytes()))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| ServiceError::Dependency(format!("reencryption task: {}", e)))??;

        tracing::info!(rekey_id, cfrags = cfrags.len(), "re-encryption performed");
        Ok(cfrags)
    }

    /// Verifies every capsule fragment, then combines them with the
    /// recipient's secret key.
    pub async fn decrypt(&self, request: DecryptRequest) -> Result<Vec<u8>, ServiceError> {
        let recipient = self
            .owners
            .load(&request.recipient_id)
            .await
            .map_err(|err| match err {
                ServiceError::NotFound(_) => {
                    ServiceError::NotFound(format!("recipient {}", request.recipient_id))
                }
                other => other,
            })?;
        let (delegating_pk, verifying_pk) = self.owners.public_keys(&request.owner_id).await?;

        let capsule = Capsule::from_bytes(&request.capsule, &self.params)?;
        let verified = request
            .cfrags
            .iter()
            .map(|bytes| {
                CapsuleFrag::from_bytes(bytes, &self.params)?.verify(
                    &capsule,
                    &verifying_pk,
                    &delegating_pk,
                    &recipient.public_key,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let plaintext = pre::decrypt_reencrypted(
            &recipient.delegating_sk,
            &delegating_pk,
            &capsule,
            &verified,
            &request.ciphertext,
        )?;
        tracing::debug!(
            recipient_id = %request.recipient_id,
            cfrags = verified.len(),
            "decrypted re-encrypted message"
        );
        Ok(plaintext)
    }

    /// Encrypts under the owner's public key.
    pub async fn encrypt(
        &self,
        owner_id: &str,
        plaintext: &[u8],
    ) -> Result<EncryptedMessage, ServiceError> {
        let (public_key, _) = self.owners.public_keys(owner_id).await?;
        let (capsule, ciphertext) = pre::encrypt(&public_key, plaintext)?;
        Ok(EncryptedMessage {
            capsule: capsule.to_bytes(),
            ciphertext,
        })
    }

    /// Explicitly deletes a rekey. Idempotent.
    pub async fn revoke(&self, rekey_id: &str) -> Result<(), ServiceError> {
        self.rekeys.delete(rekey_id).await
    }

    pub async fn health(&self) -> HealthReport {
        let store_connected = self.store.ping().await;
        if !store_connected {
            tracing::warn!("secret store unreachable");
        }
        HealthReport {
            status: if store_connected { "healthy" } else { "degraded" }.to_string(),
            store_connected,
            timestamp: self.clock.now(),
        }
    }
}
