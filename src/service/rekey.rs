//! Re-encryption key lifecycle: fragment sets bound to an owner, a recipient,
//! a resource and an expiry.

use crate::pre::{generate_kfrags, KeyFrag, Params, PublicKey, VerifiedKeyFrag};
use crate::service::error::ServiceError;
use crate::service::ledger::GrantLedger;
use crate::service::owner::OwnerRegistry;
use crate::service::retry::RetryingStore;
use crate::service::store::{decode_record, encode_record};
use crate::service::{validate_id, Clock};

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

/// A stored fragment set. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RekeyRecord {
    pub rekey_id: String,
    pub owner_id: String,
    pub recipient_id: String,
    pub resource_id: String,
    pub expiry: DateTime<Utc>,
    pub threshold: usize,
    pub shares: usize,
    /// Base64 of each serialized kfrag.
    pub kfrags: Vec<String>,
    pub owner_public_key: String,
    pub owner_verifying_key: String,
    pub recipient_public_key: String,
    pub created_at: DateTime<Utc>,
}

impl RekeyRecord {
    /// True once `now` is strictly past the expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct GrantIndex {
    rekey_id: String,
}

pub struct RekeyManager {
    store: RetryingStore,
    owners: Arc<OwnerRegistry>,
    ledger: Arc<dyn GrantLedger>,
    clock: Arc<dyn Clock>,
    params: Arc<Params>,
    prefix: String,
    trust_stored_kfrags: bool,
}

impl RekeyManager {
    pub fn new(
        store: RetryingStore,
        owners: Arc<OwnerRegistry>,
        ledger: Arc<dyn GrantLedger>,
        clock: Arc<dyn Clock>,
        params: Arc<Params>,
        prefix: impl Into<String>,
        trust_stored_kfrags: bool,
    ) -> Self {
        Self {
            store,
            owners,
            ledger,
            clock,
            params,
            prefix: prefix.into(),
            trust_stored_kfrags,
        }
    }

    fn rekeys_prefix(&self) -> String {
        format!("{}/rekeys", self.prefix)
    }

    fn record_path(&self, rekey_id: &str) -> String {
        format!("{}/rekeys/{}", self.prefix, rekey_id)
    }

    fn grant_path(
        &self,
        owner_id: &str,
        recipient_id: &str,
        resource_id: &str,
        expiry: DateTime<Utc>,
        threshold: usize,
        shares: usize,
    ) -> String {
        // Identifiers never contain '|'.
        let mut hasher = Sha256::new();
        hasher.update(
            format!(
                "{}|{}|{}|{}|{}|{}",
                owner_id,
                recipient_id,
                resource_id,
                expiry.to_rfc3339(),
                threshold,
                shares
            )
            .as_bytes(),
        );
        format!("{}/grants/{}", self.prefix, hex::encode(hasher.finalize()))
    }

    /// Splits a re-encryption key from `owner_id` to `recipient_id` into
    /// `shares` fragments, any `threshold` of which suffice, and stores them
    /// until `expiry`.
    ///
    /// Concurrent calls with identical arguments agree on a single rekey id.
    pub async fn create(
        &self,
        owner_id: &str,
        recipient_id: &str,
        resource_id: &str,
        expiry: DateTime<Utc>,
        threshold: usize,
        shares: usize,
    ) -> Result<String, ServiceError> {
        validate_id("owner_id", owner_id)?;
        validate_id("recipient_id", recipient_id)?;
        validate_id("resource_id", resource_id)?;
        if threshold == 0 || threshold > shares {
            return Err(ServiceError::Validation(format!(
                "threshold {} must be between 1 and shares {}",
                threshold, shares
            )));
        }
        let now = self.clock.now();
        if expiry <= now {
            return Err(ServiceError::Validation(
                "expiry must be in the future".to_string(),
            ));
        }

        let owner = self.owners.load(owner_id).await?;
        let (recipient_pk, _) = self
            .owners
            .public_keys(recipient_id)
            .await
            .map_err(|err| match err {
                ServiceError::NotFound(_) => {
                    ServiceError::NotFound(format!("recipient {}", recipient_id))
                }
                other => other,
            })?;

        let kfrags = generate_kfrags(
            &owner.delegating_sk,
            &recipient_pk,
            &owner.signer,
            threshold,
            shares,
            true,
            true,
        )?;

        let rekey_id = uuid::Uuid::new_v4().to_string();
        let record = RekeyRecord {
            rekey_id: rekey_id.clone(),
            owner_id: owner_id.to_string(),
            recipient_id: recipient_id.to_string(),
            resource_id: resource_id.to_string(),
            expiry,
            threshold,
            shares,
            kfrags: kfrags
                .iter()
                .map(|kfrag| STANDARD.encode(kfrag.to_bytes()))
                .collect(),
            owner_public_key: hex::encode(owner.public_key.to_bytes()),
            owner_verifying_key: hex::encode(owner.verifying_key.to_bytes()),
            recipient_public_key: hex::encode(recipient_pk.to_bytes()),
            created_at: now,
        };
        self.store
            .put(&self.record_path(&rekey_id), &encode_record(&record)?)
            .await?;

        let grant = self.grant_path(owner_id, recipient_id, resource_id, expiry, threshold, shares);
        let winner = match self.claim_grant(&grant, &rekey_id).await {
            Ok(winner) => winner,
            Err(err) => {
                self.discard(&rekey_id).await;
                return Err(err);
            }
        };
        if winner != rekey_id {
            tracing::info!(
                rekey_id = %winner,
                discarded = %rekey_id,
                "identical rekey created concurrently, keeping existing"
            );
            self.discard(&rekey_id).await;
            return Ok(winner);
        }

        tracing::info!(
            rekey_id = %rekey_id,
            owner_id,
            recipient_id,
            resource_id,
            expiry = %expiry.to_rfc3339(),
            threshold,
            shares,
            "generated rekey"
        );

        if let Err(err) = self
            .ledger
            .record_grant(resource_id, recipient_id, expiry)
            .await
        {
            tracing::warn!(rekey_id = %rekey_id, error = %err, "failed to record grant in ledger");
        }

        Ok(rekey_id)
    }

    /// Drops the record of a create that did not complete. Failures are only
    /// logged.
    async fn discard(&self, rekey_id: &str) {
        if let Err(err) = self.store.delete(&self.record_path(rekey_id)).await {
            tracing::warn!(rekey_id, error = %err, "failed to delete unclaimed rekey record");
        }
    }

    /// Points the grant index at `rekey_id` unless a live rekey already holds
    /// it. Returns the id that owns the grant.
    async fn claim_grant(&self, grant: &str, rekey_id: &str) -> Result<String, ServiceError> {
        let index = encode_record(&GrantIndex {
            rekey_id: rekey_id.to_string(),
        })?;
        let mut replaced_stale = false;

        loop {
            if self.store.put_if_absent(grant, &index).await? {
                return Ok(rekey_id.to_string());
            }

            let holder = match self.read_index(grant).await? {
                Some(holder) => holder,
                // Removed between our write attempt and the read.
                None => continue,
            };
            if holder.rekey_id == rekey_id || self.is_live(&holder.rekey_id).await? {
                return Ok(holder.rekey_id);
            }

            if replaced_stale {
                tracing::warn!(grant, rekey_id, "grant index still stale, leaving it");
                return Ok(rekey_id.to_string());
            }
            tracing::debug!(grant, stale = %holder.rekey_id, "replacing stale grant index");
            if self.release_index(grant, &holder.rekey_id).await? {
                replaced_stale = true;
            }
        }
    }

    /// Deletes the grant index if it still points at `rekey_id`. Returns
    /// whether it did.
    ///
    /// The read and the delete are two store calls, so a writer that lands in
    /// between can still lose its index. The orphaned rekey stays readable by
    /// id; only deduplication of later identical requests is lost.
    async fn release_index(&self, grant: &str, rekey_id: &str) -> Result<bool, ServiceError> {
        match self.read_index(grant).await? {
            Some(holder) if holder.rekey_id == rekey_id => {
                self.store.delete(grant).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn read_index(&self, grant: &str) -> Result<Option<GrantIndex>, ServiceError> {
        match self.store.get(grant).await? {
            Some(data) => Ok(Some(decode_record(data)?)),
            None => Ok(None),
        }
    }

    async fn is_live(&self, rekey_id: &str) -> Result<bool, ServiceError> {
        Ok(match self.read_record(rekey_id).await? {
            Some(record) => !record.is_expired(self.clock.now()),
            None => false,
        })
    }

    async fn read_record(&self, rekey_id: &str) -> Result<Option<RekeyRecord>, ServiceError> {
        match self.store.get(&self.record_path(rekey_id)).await? {
            Some(data) => Ok(Some(decode_record(data)?)),
            None => Ok(None),
        }
    }

    /// Returns the record of a live rekey. An expired record is deleted on
    /// sight, so the next call reports it as not found.
    pub async fn get(&self, rekey_id: &str) -> Result<RekeyRecord, ServiceError> {
        validate_id("rekey_id", rekey_id)?;
        let record = self
            .read_record(rekey_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("rekey {}", rekey_id)))?;

        if record.is_expired(self.clock.now()) {
            tracing::info!(rekey_id, "rekey expired, deleting");
            if let Err(err) = self.remove(&record).await {
                tracing::warn!(rekey_id, error = %err, "failed to delete expired rekey");
            }
            return Err(ServiceError::Expired(rekey_id.to_string()));
        }
        Ok(record)
    }

    /// Deletes a rekey. Deleting an unknown id succeeds.
    pub async fn delete(&self, rekey_id: &str) -> Result<(), ServiceError> {
        validate_id("rekey_id", rekey_id)?;
        match self.read_record(rekey_id).await? {
            Some(record) => self.remove(&record).await?,
            None => self.store.delete(&self.record_path(rekey_id)).await?,
        }
        tracing::info!(rekey_id, "rekey deleted");
        Ok(())
    }

    async fn remove(&self, record: &RekeyRecord) -> Result<(), ServiceError> {
        let grant = self.grant_path(
            &record.owner_id,
            &record.recipient_id,
            &record.resource_id,
            record.expiry,
            record.threshold,
            record.shares,
        );
        self.release_index(&grant, &record.rekey_id).await?;
        self.store.delete(&self.record_path(&record.rekey_id)).await
    }

    /// Deletes every expired rekey. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, ServiceError> {
        let now = self.clock.now();
        let mut purged = 0;
        for path in self.store.list(&self.rekeys_prefix()).await? {
            let data = match self.store.get(&path).await? {
                Some(data) => data,
                None => continue,
            };
            let record: RekeyRecord = match decode_record(data) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "skipping unreadable rekey record");
                    continue;
                }
            };
            if record.is_expired(now) {
                self.remove(&record).await?;
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::info!(purged, "purged expired rekeys");
        }
        Ok(purged)
    }

    /// Runs [`purge_expired`](Self::purge_expired) every `interval` until the
    /// handle is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.purge_expired().await {
                    tracing::warn!(error = %err, "rekey sweep failed");
                }
            }
        })
    }

    /// Decodes the fragments of a record, checking each against the keys the
    /// record names unless stored fragments are trusted.
    pub fn load_kfrags(&self, record: &RekeyRecord) -> Result<Vec<VerifiedKeyFrag>, ServiceError> {
        let corrupt = || {
            ServiceError::Dependency(format!("rekey {} holds a corrupt fragment", record.rekey_id))
        };

        let keys = if self.trust_stored_kfrags {
            None
        } else {
            Some((
                self.decode_key(&record.owner_verifying_key).ok_or_else(corrupt)?,
                self.decode_key(&record.owner_public_key).ok_or_else(corrupt)?,
                self.decode_key(&record.recipient_public_key).ok_or_else(corrupt)?,
            ))
        };

        record
            .kfrags
            .iter()
            .map(|encoded| {
                let bytes = STANDARD.decode(encoded).map_err(|_| corrupt())?;
                match &keys {
                    None => VerifiedKeyFrag::from_verified_bytes(&bytes, &self.params)
                        .map_err(|_| corrupt()),
                    Some((verifying_pk, delegating_pk, receiving_pk)) => {
                        let kfrag =
                            KeyFrag::from_bytes(&bytes, &self.params).map_err(|_| corrupt())?;
                        kfrag
                            .verify(verifying_pk, Some(delegating_pk), Some(receiving_pk))
                            .map_err(|_| {
                                tracing::error!(rekey_id = %record.rekey_id, "stored kfrag failed verification");
                                ServiceError::Verification
                            })
                    }
                }
            })
            .collect()
    }

    fn decode_key(&self, encoded: &str) -> Option<PublicKey> {
        let bytes = hex::decode(encoded).ok()?;
        PublicKey::from_bytes(&bytes, &self.params).ok()
    }

    /// Raw access for tests that tamper with stored records.
    #[cfg(test)]
    pub(crate) async fn raw_record(
        &self,
        rekey_id: &str,
    ) -> Option<crate::service::store::SecretData> {
        self.store.get(&self.record_path(rekey_id)).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pre::new_standard_params;
    use crate::service::clock::ManualClock;
    use crate::service::ledger::{LedgerError, TracingLedger};
    use crate::service::retry::StoreCaller;
    use crate::service::store::{InMemoryStore, SecretData, SecretStore, StoreError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        rekeys: Arc<RekeyManager>,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    async fn fixture_with(ledger: Arc<dyn GrantLedger>, trust: bool) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        fixture_over(store.clone(), store, ledger, trust).await
    }

    /// `backend` is what the manager talks to, `store` the memory underneath.
    async fn fixture_over(
        backend: Arc<dyn SecretStore>,
        store: Arc<InMemoryStore>,
        ledger: Arc<dyn GrantLedger>,
        trust: bool,
    ) -> Fixture {
        let clock = Arc::new(ManualClock::new(start()));
        let params = new_standard_params().unwrap();
        let retrying = RetryingStore::new(
            backend,
            StoreCaller::new(Duration::from_secs(1), 0, Duration::from_millis(1)),
        );
        let owners = Arc::new(OwnerRegistry::new(
            retrying.clone(),
            params.clone(),
            "umbral",
            clock.clone(),
        ));
        owners.prepare("alice").await.unwrap();
        owners.prepare("bob").await.unwrap();
        let rekeys = Arc::new(RekeyManager::new(
            retrying,
            owners,
            ledger,
            clock.clone(),
            params,
            "umbral",
            trust,
        ));
        Fixture {
            store,
            clock,
            rekeys,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(TracingLedger), false).await
    }

    fn in_an_hour() -> DateTime<Utc> {
        start() + chrono::Duration::hours(1)
    }

    #[tokio::test]
    async fn create_and_get() {
        let f = fixture().await;
        let id = f
            .rekeys
            .create("alice", "bob", "doc-1", in_an_hour(), 2, 3)
            .await
            .unwrap();

        let record = f.rekeys.get(&id).await.unwrap();
        assert_eq!(record.rekey_id, id);
        assert_eq!(record.owner_id, "alice");
        assert_eq!(record.recipient_id, "bob");
        assert_eq!((record.threshold, record.shares), (2, 3));
        assert_eq!(record.kfrags.len(), 3);
        assert_eq!(record.expiry, in_an_hour());
        assert_eq!(record.created_at, start());

        let kfrags = f.rekeys.load_kfrags(&record).unwrap();
        assert_eq!(kfrags.len(), 3);
    }

    #[tokio::test]
    async fn expiry_is_enforced_then_record_is_gone() {
        let f = fixture().await;
        let id = f
            .rekeys
            .create("alice", "bob", "doc-1", in_an_hour(), 1, 1)
            .await
            .unwrap();

        // Still valid exactly at expiry.
        f.clock.set(in_an_hour());
        f.rekeys.get(&id).await.unwrap();

        f.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(f.rekeys.get(&id).await.unwrap_err().kind(), "expired");
        assert_eq!(f.rekeys.get(&id).await.unwrap_err().kind(), "not_found");
        assert!(f.store.list("umbral/grants").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_validates_request() {
        let f = fixture().await;
        let cases = [
            ("alice", "bob", start(), 1, 1, "validation"),
            ("alice", "bob", start() - chrono::Duration::seconds(5), 1, 1, "validation"),
            ("alice", "bob", in_an_hour(), 3, 2, "validation"),
            ("alice", "bob", in_an_hour(), 0, 2, "validation"),
            ("mallory", "bob", in_an_hour(), 1, 1, "not_found"),
            ("alice", "mallory", in_an_hour(), 1, 1, "not_found"),
            ("alice", "b/ob", in_an_hour(), 1, 1, "validation"),
        ];
        for (owner, recipient, expiry, m, n, kind) in cases {
            let err = f
                .rekeys
                .create(owner, recipient, "doc-1", expiry, m, n)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), kind, "{} {} {} {}", owner, recipient, m, n);
        }
        assert!(f.store.list("umbral/rekeys").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_recipient_names_the_recipient() {
        let f = fixture().await;
        let err = f
            .rekeys
            .create("alice", "mallory", "doc-1", in_an_hour(), 1, 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("recipient mallory"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let f = fixture().await;
        let id = f
            .rekeys
            .create("alice", "bob", "doc-1", in_an_hour(), 1, 2)
            .await
            .unwrap();
        f.rekeys.delete(&id).await.unwrap();
        f.rekeys.delete(&id).await.unwrap();
        f.rekeys.delete("never-existed").await.unwrap();
        assert_eq!(f.rekeys.get(&id).await.unwrap_err().kind(), "not_found");

        // The grant is free again.
        let again = f
            .rekeys
            .create("alice", "bob", "doc-1", in_an_hour(), 1, 2)
            .await
            .unwrap();
        assert_ne!(again, id);
    }

    #[tokio::test]
    async fn concurrent_identical_creates_agree() {
        let f = fixture().await;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let rekeys = Arc::clone(&f.rekeys);
            handles.push(tokio::spawn(async move {
                rekeys
                    .create("alice", "bob", "doc-1", in_an_hour(), 2, 3)
                    .await
                    .unwrap()
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(f.store.list("umbral/rekeys").await.unwrap(), vec![format!("umbral/rekeys/{}", ids[0])]);
        assert_eq!(f.store.list("umbral/grants").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn distinct_requests_get_distinct_rekeys() {
        let f = fixture().await;
        let a = f
            .rekeys
            .create("alice", "bob", "doc-1", in_an_hour(), 1, 1)
            .await
            .unwrap();
        let b = f
            .rekeys
            .create("alice", "bob", "doc-2", in_an_hour(), 1, 1)
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn stale_grant_index_is_replaced() {
        let f = fixture().await;
        let first = f
            .rekeys
            .create("alice", "bob", "doc-1", in_an_hour(), 1, 1)
            .await
            .unwrap();
        // Record disappears behind the manager's back, index stays.
        f.store
            .delete(&format!("umbral/rekeys/{}", first))
            .await
            .unwrap();

        let second = f
            .rekeys
            .create("alice", "bob", "doc-1", in_an_hour(), 1, 1)
            .await
            .unwrap();
        assert_ne!(first, second);
        f.rekeys.get(&second).await.unwrap();
    }

    struct FailingLedger {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GrantLedger for FailingLedger {
        async fn record_grant(
            &self,
            _resource_id: &str,
            _recipient_id: &str,
            _expiry: DateTime<Utc>,
        ) -> Result<(), LedgerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::Unavailable("chain is down".into()))
        }
    }

    #[tokio::test]
    async fn ledger_failure_does_not_roll_back() {
        let ledger = Arc::new(FailingLedger {
            calls: AtomicUsize::new(0),
        });
        let f = fixture_with(ledger.clone(), false).await;
        let id = f
            .rekeys
            .create("alice", "bob", "doc-1", in_an_hour(), 1, 1)
            .await
            .unwrap();
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);
        f.rekeys.get(&id).await.unwrap();
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let f = fixture().await;
        let short = f
            .rekeys
            .create("alice", "bob", "doc-1", start() + chrono::Duration::minutes(5), 1, 1)
            .await
            .unwrap();
        let long = f
            .rekeys
            .create("alice", "bob", "doc-2", in_an_hour(), 1, 1)
            .await
            .unwrap();

        assert_eq!(f.rekeys.purge_expired().await.unwrap(), 0);
        f.clock.advance(chrono::Duration::minutes(10));
        assert_eq!(f.rekeys.purge_expired().await.unwrap(), 1);

        assert_eq!(f.rekeys.get(&short).await.unwrap_err().kind(), "not_found");
        f.rekeys.get(&long).await.unwrap();
    }

    #[tokio::test]
    async fn sweeper_purges_in_background() {
        let f = fixture().await;
        let id = f
            .rekeys
            .create("alice", "bob", "doc-1", start() + chrono::Duration::minutes(1), 1, 1)
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::minutes(2));

        let handle = Arc::clone(&f.rekeys).spawn_sweeper(Duration::from_millis(10));
        let mut gone = false;
        for _ in 0..100 {
            if f.rekeys.raw_record(&id).await.is_none() {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert!(gone);
    }

    #[tokio::test]
    async fn tampered_kfrag_is_rejected_unless_trusted() {
        for trust in [false, true] {
            let f = fixture_with(Arc::new(TracingLedger), trust).await;
            let id = f
                .rekeys
                .create("alice", "bob", "doc-1", in_an_hour(), 1, 1)
                .await
                .unwrap();

            // Swap in the owner key for the recipient key: signatures no longer match.
            let mut record = f.rekeys.get(&id).await.unwrap();
            record.recipient_public_key = record.owner_public_key.clone();

            let loaded = f.rekeys.load_kfrags(&record);
            if trust {
                assert_eq!(loaded.unwrap().len(), 1);
            } else {
                assert_eq!(loaded.unwrap_err().kind(), "verification");
            }
        }
    }

    #[tokio::test]
    async fn garbage_kfrag_is_a_dependency_error() {
        let f = fixture().await;
        let id = f
            .rekeys
            .create("alice", "bob", "doc-1", in_an_hour(), 1, 1)
            .await
            .unwrap();
        let mut record = f.rekeys.get(&id).await.unwrap();
        record.kfrags[0] = STANDARD.encode(b"short");
        assert_eq!(f.rekeys.load_kfrags(&record).unwrap_err().kind(), "dependency");
    }

    #[tokio::test]
    async fn expiry_keeps_sub_second_precision() {
        let f = fixture().await;
        let now = start() + chrono::Duration::milliseconds(500);
        f.clock.set(now);
        let expiry = now + chrono::Duration::milliseconds(300);

        let id = f
            .rekeys
            .create("alice", "bob", "doc-1", expiry, 1, 1)
            .await
            .unwrap();
        assert_eq!(f.rekeys.get(&id).await.unwrap().expiry, expiry);

        let raw = f.rekeys.raw_record(&id).await.unwrap();
        let stored: DateTime<Utc> = serde_json::from_value(raw["expiry"].clone()).unwrap();
        assert_eq!(stored, expiry);

        f.clock.set(expiry);
        f.rekeys.get(&id).await.unwrap();
        f.clock.advance(chrono::Duration::milliseconds(1));
        assert_eq!(f.rekeys.get(&id).await.unwrap_err().kind(), "expired");
    }

    #[tokio::test]
    async fn expiries_within_one_second_are_distinct_grants() {
        let f = fixture().await;
        let a = f
            .rekeys
            .create("alice", "bob", "doc-1", in_an_hour(), 1, 1)
            .await
            .unwrap();
        let b = f
            .rekeys
            .create(
                "alice",
                "bob",
                "doc-1",
                in_an_hour() + chrono::Duration::milliseconds(250),
                1,
                1,
            )
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(f.store.list("umbral/grants").await.unwrap().len(), 2);
    }

    /// Memory store whose conditional writes to the grant index can be
    /// switched off.
    struct GrantOutageStore {
        inner: Arc<InMemoryStore>,
        down: AtomicBool,
    }

    #[async_trait]
    impl SecretStore for GrantOutageStore {
        async fn get(&self, path: &str) -> Result<Option<SecretData>, StoreError> {
            self.inner.get(path).await
        }
        async fn put(&self, path: &str, data: &SecretData) -> Result<(), StoreError> {
            self.inner.put(path, data).await
        }
        async fn put_if_absent(&self, path: &str, data: &SecretData) -> Result<bool, StoreError> {
            if path.contains("/grants/") && self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("grant index offline".into()));
            }
            self.inner.put_if_absent(path, data).await
        }
        async fn delete(&self, path: &str) -> Result<(), StoreError> {
            self.inner.delete(path).await
        }
        async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list(prefix).await
        }
        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn failed_grant_claim_leaves_no_record() {
        let memory = Arc::new(InMemoryStore::new());
        let backend = Arc::new(GrantOutageStore {
            inner: memory.clone(),
            down: AtomicBool::new(true),
        });
        let f = fixture_over(backend.clone(), memory, Arc::new(TracingLedger), false).await;

        let err = f
            .rekeys
            .create("alice", "bob", "doc-1", in_an_hour(), 2, 3)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "dependency");
        assert!(f.store.list("umbral/rekeys").await.unwrap().is_empty());
        assert!(f.store.list("umbral/grants").await.unwrap().is_empty());

        backend.down.store(false, Ordering::SeqCst);
        let id = f
            .rekeys
            .create("alice", "bob", "doc-1", in_an_hour(), 2, 3)
            .await
            .unwrap();
        assert_eq!(
            f.store.list("umbral/rekeys").await.unwrap(),
            vec![format!("umbral/rekeys/{}", id)]
        );
    }

    #[tokio::test]
    async fn stale_index_is_only_released_by_its_holder() {
        let f = fixture().await;
        let live = f
            .rekeys
            .create("alice", "bob", "doc-1", in_an_hour(), 1, 1)
            .await
            .unwrap();
        let grant = f.store.list("umbral/grants").await.unwrap().remove(0);

        // A creator that saw an older holder must not drop the current one.
        assert!(!f.rekeys.release_index(&grant, "older-rekey").await.unwrap());
        assert_eq!(f.store.list("umbral/grants").await.unwrap(), vec![grant.clone()]);

        assert!(f.rekeys.release_index(&grant, &live).await.unwrap());
        assert!(f.store.list("umbral/grants").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_creates_over_stale_index_agree() {
        let f = fixture().await;
        let first = f
            .rekeys
            .create("alice", "bob", "doc-1", in_an_hour(), 2, 3)
            .await
            .unwrap();
        f.store
            .delete(&format!("umbral/rekeys/{}", first))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let rekeys = Arc::clone(&f.rekeys);
            handles.push(tokio::spawn(async move {
                rekeys
                    .create("alice", "bob", "doc-1", in_an_hour(), 2, 3)
                    .await
                    .unwrap()
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_ne!(ids[0], first);
        f.rekeys.get(&ids[0]).await.unwrap();
        assert_eq!(
            f.store.list("umbral/rekeys").await.unwrap(),
            vec![format!("umbral/rekeys/{}", ids[0])]
        );
    }
}
