//! Where granted access is announced once a rekey exists.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_error::quick_error;

quick_error! {
  #[derive(Debug)]
  pub enum LedgerError {
      Unavailable(msg: String) {
        display("ledger unavailable: {}", msg)
      }
      Rejected(msg: String) {
        display("ledger rejected grant: {}", msg)
      }
  }
}

#[async_trait]
pub trait GrantLedger: Send + Sync {
    async fn record_grant(
        &self,
        resource_id: &str,
        recipient_id: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), LedgerError>;
}

/// Records grants in the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLedger;

#[async_trait]
impl GrantLedger for TracingLedger {
    async fn record_grant(
        &self,
        resource_id: &str,
        recipient_id: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        tracing::info!(
            resource_id,
            recipient_id,
            expiry = %expiry.to_rfc3339(),
            "access grant recorded"
        );
        Ok(())
    }
}
