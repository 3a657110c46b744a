use quick_error::quick_error;

use openssl::error::ErrorStack;

quick_error! {
  #[derive(Debug)]
  pub enum PreErrors {
      EncryptionError {
        display("Encryption error")
      }
      DecryptionError {
        display("Decryption error")
      }
      DerivationError {
        display("Key Derivation error")
      }
      RandomnessFailure {
        display("The randomness source failed")
      }
      InvalidKFragThreshold {
        display("The threshold in input is not valid")
      }
      KeysParametersNotEq {
        display("Keys parameters are not the same")
      }
      VerificationFailed {
        display("The fragment failed verification")
      }
      InvalidCapsule {
        display("The capsule is not valid")
      }
      InvalidBytes {
        display("The bytes given in input are not valid")
      }
      Primitive(err: ErrorStack) {
        from()
        display("Curve primitive error: {}", err)
        source(err)
      }
  }
}

// ErrorStack has no PartialEq, so errors compare by kind only.
impl PartialEq for PreErrors {
  fn eq(&self, other: &PreErrors) -> bool {
    std::mem::discriminant(self) == std::mem::discriminant(other)
  }
}
