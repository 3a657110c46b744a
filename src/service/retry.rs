//! Bounded, timed calls into the secret store.

use crate::service::config::StoreConfig;
use crate::service::error::ServiceError;
use crate::service::store::{SecretData, SecretStore, StoreError};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// Wraps store calls in a timeout and retries transient failures.
///
/// Only `StoreError::Unavailable` is retried. A timed-out call is not, since
/// the operation may still complete on the far side.
#[derive(Debug, Clone)]
pub struct StoreCaller {
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl StoreCaller {
    pub fn new(timeout: Duration, max_retries: u32, backoff: Duration) -> Self {
        Self {
            timeout,
            max_retries,
            backoff,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.timeout(), config.max_retries, config.retry_backoff())
    }

    pub async fn call<T, F, Fut>(&self, op: &str, mut f: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let err = match tokio::time::timeout(self.timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => {
                    tracing::warn!(op, timeout_ms = self.timeout.as_millis() as u64, "store call timed out");
                    return Err(ServiceError::Dependency(format!(
                        "secret store: {} timed out",
                        op
                    )));
                }
            };

            if !matches!(err, StoreError::Unavailable(_)) || attempt >= self.max_retries {
                tracing::error!(op, attempt, error = %err, "store call failed");
                return Err(err.into());
            }

            attempt += 1;
            let delay = self.delay_for(attempt);
            tracing::debug!(op, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying store call");
            tokio::time::sleep(delay).await;
        }
    }

    /// `backoff · 2^(attempt-1)` plus up to half of that again as jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self
            .backoff
            .saturating_mul(1u32 << (attempt - 1).min(16));
        let jitter_ms = {
            let half = (base.as_millis() as u64) / 2;
            if half == 0 {
                0
            } else {
                rand::thread_rng().gen_range(0..=half)
            }
        };
        base + Duration::from_millis(jitter_ms)
    }
}

/// A secret store whose every call goes through a [`StoreCaller`].
#[derive(Clone)]
pub struct RetryingStore {
    inner: Arc<dyn SecretStore>,
    caller: StoreCaller,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn SecretStore>, caller: StoreCaller) -> Self {
        Self { inner, caller }
    }

    pub async fn get(&self, path: &str) -> Result<Option<SecretData>, ServiceError> {
        self.caller.call("get", || self.inner.get(path)).await
    }

    pub async fn put(&self, path: &str, data: &SecretData) -> Result<(), ServiceError> {
        self.caller.call("put", || self.inner.put(path, data)).await
    }

    pub async fn put_if_absent(&self, path: &str, data: &SecretData) -> Result<bool, ServiceError> {
        self.caller
            .call("put_if_absent", || self.inner.put_if_absent(path, data))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ServiceError> {
        self.caller.call("delete", || self.inner.delete(path)).await
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, ServiceError> {
        self.caller.call("list", || self.inner.list(prefix)).await
    }

    pub async fn ping(&self) -> bool {
        self.caller.call("ping", || self.inner.ping()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn caller(max_retries: u32) -> StoreCaller {
        StoreCaller::new(Duration::from_millis(100), max_retries, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn retries_unavailable_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let value = caller(3)
            .call("get", || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StoreError::Unavailable("flaky".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let err = caller(2)
            .call("put", || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(StoreError::Unavailable("down".into()))
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "dependency");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let err = caller(5)
            .call("get", || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(StoreError::InvalidPath("x y".into()))
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "dependency");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let err = caller(5)
            .call("get", || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    std::future::pending::<Result<(), StoreError>>().await
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Dependency(ref msg) if msg.contains("timed out")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_and_stays_bounded() {
        let caller = StoreCaller::new(Duration::from_secs(1), 3, Duration::from_millis(10));
        for attempt in 1..=4u32 {
            let base = Duration::from_millis(10 * (1 << (attempt - 1)));
            let delay = caller.delay_for(attempt);
            assert!(delay >= base && delay <= base + base / 2, "{:?}", delay);
        }
    }
}
