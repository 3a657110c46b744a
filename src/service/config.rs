use crate::pre::{new_params, Params};
use crate::service::error::ServiceError;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use openssl::nid::Nid;
use serde::{Deserialize, Serialize};

/// Process configuration for the proxy service, usually read from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Curve name: `secp256k1`, `prime256v1` (alias `secp256r1`) or `secp384r1`.
    pub curve: String,
    /// First path segment of everything written to the store.
    pub key_prefix: String,
    /// Default log level; `RUST_LOG` takes precedence.
    pub log_level: String,
    /// Skip signature checks on kfrags read back from the store.
    pub trust_stored_kfrags: bool,
    /// Period of the expired-rekey sweeper, disabled when unset.
    pub sweep_interval_secs: Option<u64>,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File { path: PathBuf },
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            curve: "secp256k1".to_string(),
            key_prefix: "umbral".to_string(),
            log_level: "info".to_string(),
            trust_stored_kfrags: false,
            sweep_interval_secs: None,
            store: StoreConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            timeout_ms: 2000,
            max_retries: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl ServiceConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ServiceError> {
        let config: ServiceConfig =
            toml::from_str(raw).map_err(|e| ServiceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ServiceError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        curve_nid(&self.curve)?;
        if crate::service::store::path_segments(&self.key_prefix).is_err() {
            return Err(ServiceError::Config(format!(
                "invalid key_prefix {:?}",
                self.key_prefix
            )));
        }
        if self.store.timeout_ms == 0 {
            return Err(ServiceError::Config("store.timeout_ms must be > 0".into()));
        }
        if self.sweep_interval_secs == Some(0) {
            return Err(ServiceError::Config(
                "sweep_interval_secs must be > 0 when set".into(),
            ));
        }
        Ok(())
    }

    /// Curve parameters for the configured curve.
    pub fn params(&self) -> Result<Arc<Params>, ServiceError> {
        Ok(new_params(curve_nid(&self.curve)?)?)
    }
}

fn curve_nid(name: &str) -> Result<Nid, ServiceError> {
    match name.to_ascii_lowercase().as_str() {
        "secp256k1" => Ok(Nid::SECP256K1),
        "prime256v1" | "secp256r1" => Ok(Nid::X9_62_PRIME256V1),
        "secp384r1" => Ok(Nid::SECP384R1),
        other => Err(ServiceError::Config(format!("unsupported curve {:?}", other))),
    }
}
