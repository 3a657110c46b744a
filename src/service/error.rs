use crate::internal::errors::PreErrors;
use crate::service::store::StoreError;

use quick_error::quick_error;

quick_error! {
  #[derive(Debug)]
  pub enum ServiceError {
      Validation(msg: String) {
        display("Invalid request: {}", msg)
      }
      NotFound(what: String) {
        display("{} not found", what)
      }
      Expired(rekey_id: String) {
        display("Rekey {} has expired", rekey_id)
      }
      Verification {
        display("A fragment failed verification")
      }
      Decryption {
        display("Decryption failed")
      }
      Dependency(msg: String) {
        display("Dependency failure: {}", msg)
      }
      Config(msg: String) {
        display("Configuration error: {}", msg)
      }
  }
}

impl From<PreErrors> for ServiceError {
  fn from(err: PreErrors) -> Self {
    match err {
      PreErrors::InvalidBytes
      | PreErrors::InvalidKFragThreshold
      | PreErrors::InvalidCapsule
      | PreErrors::KeysParametersNotEq => ServiceError::Validation(err.to_string()),
      PreErrors::VerificationFailed => ServiceError::Verification,
      PreErrors::DecryptionError => ServiceError::Decryption,
      PreErrors::EncryptionError
      | PreErrors::DerivationError
      | PreErrors::RandomnessFailure
      | PreErrors::Primitive(_) => ServiceError::Dependency(err.to_string()),
    }
  }
}

impl From<StoreError> for ServiceError {
  fn from(err: StoreError) -> Self {
    ServiceError::Dependency(format!("secret store: {}", err))
  }
}

impl ServiceError {
  /// Stable, lowercase name of the error kind, for logs and responses.
  pub fn kind(&self) -> &'static str {
    match self {
      ServiceError::Validation(_) => "validation",
      ServiceError::NotFound(_) => "not_found",
      ServiceError::Expired(_) => "expired",
      ServiceError::Verification => "verification",
      ServiceError::Decryption => "decryption",
      ServiceError::Dependency(_) => "dependency",
      ServiceError::Config(_) => "config",
    }
  }
}
